//! The build pipeline orchestrator

use std::sync::Arc;
use std::time::Instant;

use trellis_analyzer::{ParserPool, create_parser_pool};
use trellis_core::{BuildError, BuildReport, BuilderArtifact, CacheStats};

use crate::assemble;
use crate::cache;
use crate::chunk::{self, ChunkManifest};
use crate::config::BuildConfig;
use crate::discovery::{self, AnalysisCache};
use crate::evaluate::{self, BuildCoordinator, ExecutionHost, Registry};
use crate::graph::{DefinitionCatalog, DependencyGraph};

/// One build pipeline bound to a configuration and an execution host.
///
/// `build` runs the full sequence: discovery → analysis → graph → synthesis →
/// evaluation → assembly. It either yields a validated artifact written to
/// disk, or fails with exactly one typed error and writes no artifact.
pub struct BuildPipeline {
    config: BuildConfig,
    host: Arc<dyn ExecutionHost>,
    coordinator: Arc<BuildCoordinator>,
    pool: ParserPool,
}

impl BuildPipeline {
    pub fn new(config: BuildConfig, host: Arc<dyn ExecutionHost>) -> Self {
        Self::with_coordinator(config, host, Arc::new(BuildCoordinator::new()))
    }

    /// Share a coordinator across pipelines so concurrent builds for the same
    /// configuration key are rejected no matter which pipeline they enter by.
    pub fn with_coordinator(
        config: BuildConfig,
        host: Arc<dyn ExecutionHost>,
        coordinator: Arc<BuildCoordinator>,
    ) -> Self {
        BuildPipeline {
            config,
            host,
            coordinator,
            pool: create_parser_pool(),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<BuildCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub async fn build(&self) -> Result<BuilderArtifact, BuildError> {
        let config_key = self.config.config_key();
        let _permit = self.coordinator.begin(&config_key)?;
        let started = Instant::now();
        tracing::info!(
            "build started for {} (configuration {})",
            self.config.root.display(),
            config_key
        );

        // ── Discovery + analysis ────────────────────────────
        let files = discovery::enumerate_files(&self.config)?;
        let cache_path = cache::analysis_cache_path(&self.config.root);
        let mut analysis_cache = AnalysisCache::load(&cache_path);
        let outcome = discovery::analyze_files(
            files,
            &mut analysis_cache,
            &self.pool,
            &self.config.analyzer_options(),
        )
        .await?;
        analysis_cache.save(&cache_path);

        let mut warnings: Vec<String> = Vec::new();
        for analysis in &outcome.analyses {
            for diagnostic in &analysis.diagnostics {
                warnings.push(format!(
                    "{}:{}: {}",
                    analysis.source_path, diagnostic.line, diagnostic.message
                ));
            }
        }

        // ── Graph ───────────────────────────────────────────
        let catalog = DefinitionCatalog::build(&outcome.analyses)?;
        let graph = DependencyGraph::build(&outcome.analyses, &catalog, &mut warnings)?;
        let order = graph.evaluation_order()?;
        tracing::debug!(
            "{} definitions, {} dependency edges",
            catalog.len(),
            graph.edge_count()
        );

        // ── Synthesis ───────────────────────────────────────
        let chunk_set = chunk::synthesize(&catalog, &order);
        let manifest_path = cache::manifest_path(&self.config.root);
        let mut manifest = ChunkManifest::load(&manifest_path);
        let write_outcome = chunk::write_chunks(&chunk_set, &self.config.root, &mut manifest).await?;
        tracing::debug!(
            "chunks: {} written, {} skipped",
            write_outcome.written,
            write_outcome.skips
        );

        // ── Evaluation ──────────────────────────────────────
        self.host
            .prepare(&cache::chunks_dir(&self.config.root))
            .await?;
        let entry_path = evaluate::entry_module_path(&self.config.root, &chunk_set.entry_file);
        let output = self.host.evaluate(&entry_path).await?;

        let mut registry = Registry::new(&config_key);
        let mut record_error: Option<BuildError> = None;
        for raw in output.entries {
            if let Err(error) = registry.record(raw, &catalog) {
                record_error = Some(error);
                break;
            }
        }
        if let Some(error) = record_error {
            // Structured issues recorded before the hard failure win; they
            // describe the build problem, the hard error only its fallout.
            if let Some(issue) = registry.drain_issues().into_iter().next() {
                return Err(issue.into_error());
            }
            return Err(error);
        }
        let entries = registry.finish()?;

        // ── Assembly ────────────────────────────────────────
        let report = BuildReport {
            duration_ms: started.elapsed().as_millis() as u64,
            warnings,
            cache: CacheStats {
                hits: outcome.hits,
                misses: outcome.misses,
                skips: write_outcome.skips,
            },
            built_at: chrono::Utc::now().to_rfc3339(),
        };
        let artifact = assemble::assemble(&catalog, entries, report)?;
        artifact.save(&cache::artifact_path(&self.config.root))?;

        tracing::info!(
            "build finished: {} elements, {} warnings, cache {}h/{}m/{}s, {}ms",
            artifact.elements.len(),
            artifact.report.warnings.len(),
            artifact.report.cache.hits,
            artifact.report.cache.misses,
            artifact.report.cache.skips,
            artifact.report.duration_ms
        );
        Ok(artifact)
    }
}
