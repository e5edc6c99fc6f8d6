//! Source discovery and the per-file analysis cache

use std::collections::HashMap;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use trellis_analyzer::{AnalyzerOptions, ParserPool, analyzer_for_path};
use trellis_core::{BuildError, ContentHash, ModuleAnalysis};

use crate::config::BuildConfig;

/// Version stamp of the analysis cache file. Any mismatch discards the cache.
pub const ANALYSIS_CACHE_VERSION: u32 = 1;

/// One enumerated source file with its content and hash.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub rel_path: String,
    pub content: String,
    pub content_hash: ContentHash,
}

/// Result of analyzing the full file set.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    /// Analyses sorted by source path.
    pub analyses: Vec<ModuleAnalysis>,
    pub hits: u32,
    pub misses: u32,
}

/// Enumerate files under the root matching the include globs.
pub fn enumerate_files(config: &BuildConfig) -> Result<Vec<DiscoveredFile>, BuildError> {
    let globs = build_globset(&config.include)?;

    let mut files = Vec::new();
    for entry in WalkBuilder::new(&config.root).build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&config.root) else {
            continue;
        };
        let rel_path = rel.to_string_lossy().replace('\\', "/");
        if !globs.is_match(&rel_path) {
            continue;
        }

        let content = std::fs::read_to_string(entry.path())?;
        let content_hash = ContentHash::of_str(&content);
        files.push(DiscoveredFile {
            rel_path,
            content,
            content_hash,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    tracing::debug!("discovered {} source files", files.len());
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, BuildError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| BuildError::Config {
            message: format!("invalid include pattern '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| BuildError::Config {
        message: format!("invalid include patterns: {e}"),
    })
}

/// Persisted map of source path → last analysis, keyed by content hash.
///
/// Any read, parse, or version failure degrades to an empty cache; the cache
/// is never allowed to fail a build.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnalysisCache {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: HashMap<String, ModuleAnalysis>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        AnalysisCache {
            version: ANALYSIS_CACHE_VERSION,
            entries: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<AnalysisCache>(&json) {
                Ok(cache) if cache.version == ANALYSIS_CACHE_VERSION => cache,
                Ok(cache) => {
                    tracing::debug!(
                        "analysis cache version {} != {}, discarding",
                        cache.version,
                        ANALYSIS_CACHE_VERSION
                    );
                    Self::new()
                }
                Err(e) => {
                    tracing::debug!("analysis cache unreadable, discarding: {}", e);
                    Self::new()
                }
            },
            Err(e) => {
                tracing::debug!("no analysis cache at {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Reuse a prior analysis when the content hash still matches.
    pub fn lookup(&self, rel_path: &str, content_hash: &ContentHash) -> Option<&ModuleAnalysis> {
        self.entries
            .get(rel_path)
            .filter(|a| &a.content_hash == content_hash)
    }

    pub fn insert(&mut self, analysis: ModuleAnalysis) {
        self.entries.insert(analysis.source_path.clone(), analysis);
    }

    /// Persist the cache. Failures are logged and swallowed; a missing cache
    /// only costs recomputation on the next build.
    pub fn save(&self, path: &Path) {
        let result = serde_json::to_string(self)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json)
            });
        if let Err(e) = result {
            tracing::warn!("failed to write analysis cache {}: {}", path.display(), e);
        }
    }
}

/// Analyze every discovered file, reusing cached analyses on hash match.
///
/// File analyses are independent; misses fan out as blocking tasks over the
/// parser pool and join in no particular order.
pub async fn analyze_files(
    files: Vec<DiscoveredFile>,
    cache: &mut AnalysisCache,
    pool: &ParserPool,
    options: &AnalyzerOptions,
) -> Result<DiscoveryOutcome, BuildError> {
    let mut analyses = Vec::new();
    let mut hits = 0u32;
    let mut misses = 0u32;
    let mut tasks = Vec::new();

    for file in files {
        if let Some(prior) = cache.lookup(&file.rel_path, &file.content_hash) {
            tracing::debug!("analysis cache hit: {}", file.rel_path);
            hits += 1;
            analyses.push(prior.clone());
            continue;
        }
        let Some(analyzer) = analyzer_for_path(Path::new(&file.rel_path), pool, options) else {
            tracing::debug!("no analyzer backend for {}", file.rel_path);
            continue;
        };
        misses += 1;
        tasks.push(tokio::task::spawn_blocking(move || {
            analyzer.analyze(&file.rel_path, &file.content)
        }));
    }

    for task in tasks {
        let analysis = task.await.map_err(|e| BuildError::Analysis {
            path: String::new(),
            message: format!("analysis task failed: {e}"),
        })??;
        cache.insert(analysis.clone());
        analyses.push(analysis);
    }

    analyses.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(DiscoveryOutcome {
        analyses,
        hits,
        misses,
    })
}
