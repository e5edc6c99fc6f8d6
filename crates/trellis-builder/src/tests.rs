//! Unit and pipeline tests for trellis-builder

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use trellis_analyzer::{AnalyzerOptions, SourceAnalyzer, TypeScriptAnalyzer, create_parser_pool};
use trellis_core::{BuildError, CanonicalId, ContentHash, ModuleAnalysis};

use crate::cache;
use crate::chunk::ChunkManifest;
use crate::config::BuildConfig;
use crate::evaluate::{BuildCoordinator, EvaluationOutput, ExecutionHost, RawRegistration};
use crate::graph::{DefinitionCatalog, DependencyGraph};
use crate::pipeline::BuildPipeline;

// ── Test execution hosts ────────────────────────────────────

/// Host double that replays the registrations the written chunks describe,
/// deriving each payload from the original file's content the way a real
/// evaluation would.
struct MockExecutionHost {
    root: PathBuf,
    /// Payload overrides keyed by canonical ID.
    payloads: HashMap<String, serde_json::Value>,
}

impl MockExecutionHost {
    fn new(root: &Path) -> Self {
        MockExecutionHost {
            root: root.to_path_buf(),
            payloads: HashMap::new(),
        }
    }

    fn with_payload(mut self, canonical_id: &str, payload: serde_json::Value) -> Self {
        self.payloads.insert(canonical_id.to_string(), payload);
        self
    }
}

#[async_trait::async_trait]
impl ExecutionHost for MockExecutionHost {
    async fn evaluate(&self, entry: &Path) -> Result<EvaluationOutput, BuildError> {
        let chunks_dir = entry.parent().map(Path::to_path_buf).unwrap_or_default();
        let entry_text = std::fs::read_to_string(entry)?;

        let mut entries = Vec::new();
        for line in entry_text.lines() {
            let Some(file) = line
                .strip_prefix("import \"./")
                .and_then(|rest| rest.strip_suffix("\";"))
            else {
                continue;
            };
            let chunk_text = std::fs::read_to_string(chunks_dir.join(file))?;

            // The original module this chunk re-exports.
            let source_rel = chunk_text
                .lines()
                .find_map(|l| l.split(" from \"../../").nth(1))
                .and_then(|rest| rest.strip_suffix("\";"))
                .unwrap_or_default();
            let source_text =
                std::fs::read_to_string(self.root.join(source_rel)).unwrap_or_default();
            let source_hash = ContentHash::of_str(&source_text);

            for line in chunk_text.lines() {
                if !line.starts_with("register(") {
                    continue;
                }
                let parts: Vec<&str> = line.split('"').collect();
                if parts.len() < 7 {
                    continue;
                }
                let (canonical_id, kind, schema) = (parts[1], parts[3], parts[5]);
                let binding = parts[6]
                    .trim_start_matches(", ")
                    .trim_end_matches(");")
                    .trim();

                let value = self
                    .payloads
                    .get(canonical_id)
                    .cloned()
                    .unwrap_or_else(|| {
                        serde_json::json!({
                            "name": binding,
                            "document": format!("{binding}@{source_hash}"),
                        })
                    });
                entries.push(RawRegistration {
                    canonical_id: canonical_id.to_string(),
                    kind: kind.to_string(),
                    schema: schema.to_string(),
                    value,
                });
            }
        }
        Ok(EvaluationOutput { entries })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Host double that always fails evaluation.
struct FailingHost;

#[async_trait::async_trait]
impl ExecutionHost for FailingHost {
    async fn evaluate(&self, entry: &Path) -> Result<EvaluationOutput, BuildError> {
        Err(BuildError::ModuleEvaluationFailed {
            module_path: entry.display().to_string(),
            message: "boom".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

// ── Fixtures ────────────────────────────────────────────────

const MODEL_FILE: &str = r#"
import { gql } from "@app/graphql";

export const userModel = gql.default(({ model }) => model.User({ id: true }));
"#;

const OPERATION_FILE: &str = r#"
import { gql } from "@app/graphql";
import { userModel } from "./models";

export const getUser = gql.default(({ query }) =>
  query.GetUser({ user: userModel.embed() })
);
"#;

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn config_for(root: &Path) -> BuildConfig {
    BuildConfig {
        root: root.to_path_buf(),
        ..BuildConfig::default()
    }
}

fn two_file_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "src/models.ts", MODEL_FILE);
    write_file(dir.path(), "src/queries.ts", OPERATION_FILE);
    dir
}

fn analyze_fixture(path: &str, source: &str) -> ModuleAnalysis {
    TypeScriptAnalyzer::new(create_parser_pool(), AnalyzerOptions::default())
        .analyze(path, source)
        .unwrap()
}

// ── Graph tests ─────────────────────────────────────────────

#[test]
fn test_graph_edge_resolution() {
    let analyses = vec![
        analyze_fixture("src/models.ts", MODEL_FILE),
        analyze_fixture("src/queries.ts", OPERATION_FILE),
    ];
    let catalog = DefinitionCatalog::build(&analyses).unwrap();
    let mut warnings = Vec::new();
    let graph = DependencyGraph::build(&analyses, &catalog, &mut warnings).unwrap();

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    assert!(warnings.is_empty());
    assert!(graph.has_edge(
        &CanonicalId::encode("src/queries.ts", "getUser"),
        &CanonicalId::encode("src/models.ts", "userModel"),
    ));
    assert!(graph.find_cycle().is_none());

    // Dependencies come first in evaluation order.
    let order = graph.evaluation_order().unwrap();
    assert_eq!(
        order,
        vec![
            CanonicalId::encode("src/models.ts", "userModel"),
            CanonicalId::encode("src/queries.ts", "getUser"),
        ]
    );
}

#[test]
fn test_graph_cycle_chain() {
    let a = r#"
import { gql } from "@app/graphql";
import { opB } from "./b";

export const opA = gql.default(({ query }) => query.A({ b: opB.embed() }));
"#;
    let b = r#"
import { gql } from "@app/graphql";
import { opA } from "./a";

export const opB = gql.default(({ query }) => query.B({ a: opA.embed() }));
"#;
    let analyses = vec![analyze_fixture("src/a.ts", a), analyze_fixture("src/b.ts", b)];
    let catalog = DefinitionCatalog::build(&analyses).unwrap();
    let mut warnings = Vec::new();
    let graph = DependencyGraph::build(&analyses, &catalog, &mut warnings).unwrap();

    let chain = graph.find_cycle().expect("cycle expected");
    assert_eq!(
        chain,
        vec![
            CanonicalId::encode("src/a.ts", "opA"),
            CanonicalId::encode("src/b.ts", "opB"),
            CanonicalId::encode("src/a.ts", "opA"),
        ]
    );

    let err = graph.evaluation_order().unwrap_err();
    assert_eq!(err.code(), "CIRCULAR_DEPENDENCY");
}

#[test]
fn test_graph_external_import_is_not_an_edge() {
    let source = r#"
import { gql } from "@app/graphql";
import { helper } from "lodash";

export const q = gql.default(({ query }) => query.Q({ h: helper.embed() }));
"#;
    let analyses = vec![analyze_fixture("src/q.ts", source)];
    let catalog = DefinitionCatalog::build(&analyses).unwrap();
    let mut warnings = Vec::new();
    let graph = DependencyGraph::build(&analyses, &catalog, &mut warnings).unwrap();

    assert_eq!(graph.edge_count(), 0);
    assert!(warnings.is_empty());
}

#[test]
fn test_graph_unresolved_export_warns() {
    let importer = r#"
import { gql } from "@app/graphql";
import { missing } from "./models";

export const q = gql.default(({ query }) => query.Q({ m: missing.embed() }));
"#;
    let analyses = vec![
        analyze_fixture("src/models.ts", MODEL_FILE),
        analyze_fixture("src/q.ts", importer),
    ];
    let catalog = DefinitionCatalog::build(&analyses).unwrap();
    let mut warnings = Vec::new();
    let graph = DependencyGraph::build(&analyses, &catalog, &mut warnings).unwrap();

    assert_eq!(graph.edge_count(), 0);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("does not name a definition export"));
}

// ── Pipeline tests ──────────────────────────────────────────

#[tokio::test]
async fn test_build_produces_artifact() {
    let dir = two_file_project();
    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    let artifact = pipeline.build().await.unwrap();
    assert_eq!(artifact.elements.len(), 2);
    assert!(artifact.report.warnings.is_empty());
    assert_eq!(artifact.report.cache.hits, 0);
    assert_eq!(artifact.report.cache.misses, 2);
    assert!(cache::artifact_path(dir.path()).exists());

    let element = artifact
        .elements
        .get(&CanonicalId::encode("src/queries.ts", "getUser"))
        .unwrap();
    assert_eq!(element.metadata.source_path, "src/queries.ts");
}

#[tokio::test]
async fn test_rebuild_with_no_changes_skips_everything() {
    let dir = two_file_project();
    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    let first = pipeline.build().await.unwrap();
    assert_eq!(first.report.cache.skips, 0);

    let second = pipeline.build().await.unwrap();
    // Runtime + one chunk per file + entry, all unchanged.
    assert_eq!(second.report.cache.skips, 4);
    assert_eq!(second.report.cache.hits, 2);
    assert_eq!(second.report.cache.misses, 0);
    assert_eq!(second.elements, first.elements);
}

#[tokio::test]
async fn test_editing_one_file_rebuilds_only_its_chunk() {
    let dir = two_file_project();
    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    let first = pipeline.build().await.unwrap();

    // Edit only the operation file; the chunk shape is unchanged but the
    // payload derived from the source must change.
    write_file(
        dir.path(),
        "src/queries.ts",
        &OPERATION_FILE.replace("user: userModel.embed()", "account: userModel.embed()"),
    );

    let second = pipeline.build().await.unwrap();
    assert_eq!(second.report.cache.hits, 1);
    assert_eq!(second.report.cache.misses, 1);
    // Every chunk still hashes the same, so all writes are skipped.
    assert_eq!(second.report.cache.skips, 4);
    assert_eq!(second.elements.len(), 2);

    let model_id = CanonicalId::encode("src/models.ts", "userModel");
    let query_id = CanonicalId::encode("src/queries.ts", "getUser");
    assert_eq!(
        first.elements[&model_id].metadata.payload_content_hash,
        second.elements[&model_id].metadata.payload_content_hash,
    );
    assert_ne!(
        first.elements[&query_id].metadata.payload_content_hash,
        second.elements[&query_id].metadata.payload_content_hash,
    );
}

#[tokio::test]
async fn test_renaming_binding_rewrites_owning_chunk() {
    let dir = two_file_project();
    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    pipeline.build().await.unwrap();

    // Renaming the export changes the canonical ID, so the owning chunk is
    // rewritten; runtime, entry, and the model chunk are all unchanged.
    write_file(
        dir.path(),
        "src/queries.ts",
        &OPERATION_FILE.replace("getUser", "fetchUser"),
    );
    let second = pipeline.build().await.unwrap();
    assert_eq!(second.report.cache.skips, 3);
    assert!(
        second
            .elements
            .contains_key(&CanonicalId::encode("src/queries.ts", "fetchUser"))
    );
}

#[tokio::test]
async fn test_deleted_chunk_output_forces_rewrite() {
    let dir = two_file_project();
    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    pipeline.build().await.unwrap();

    // Remove one written chunk; the manifest still matches otherwise.
    let chunks = cache::chunks_dir(dir.path());
    let victim = std::fs::read_dir(&chunks)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            let name = p.file_name().unwrap_or_default().to_string_lossy().into_owned();
            name.starts_with("src_models_ts")
        })
        .expect("model chunk on disk");
    std::fs::remove_file(&victim).unwrap();

    let second = pipeline.build().await.unwrap();
    assert_eq!(second.report.cache.skips, 3);
    assert!(victim.exists(), "deleted chunk must be rewritten");
}

#[tokio::test]
async fn test_duplicate_operation_name_fails_build() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "src/a.ts",
        r#"
import { gql } from "@app/graphql";
export const first = gql.default(({ query }) => query.GetUser({}));
"#,
    );
    write_file(
        dir.path(),
        "src/b.ts",
        r#"
import { gql } from "@app/graphql";
export const second = gql.default(({ query }) => query.GetUser({}));
"#,
    );

    let host = Arc::new(
        MockExecutionHost::new(dir.path())
            .with_payload("src/a.ts::first", serde_json::json!({"name": "GetUser"}))
            .with_payload("src/b.ts::second", serde_json::json!({"name": "GetUser"})),
    );
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    let err = pipeline.build().await.unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_OPERATION_NAME");
    assert!(
        !cache::artifact_path(dir.path()).exists(),
        "no artifact may be persisted on conflict"
    );
}

#[tokio::test]
async fn test_same_operation_name_in_different_schemas_is_allowed() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "src/a.ts",
        r#"
import { gql } from "@app/graphql";
export const first = gql.default(({ query }) => query.GetUser({}));
"#,
    );
    write_file(
        dir.path(),
        "src/b.ts",
        r#"
import { gql } from "@app/graphql";
export const second = gql.admin(({ query }) => query.GetUser({}));
"#,
    );

    let host = Arc::new(
        MockExecutionHost::new(dir.path())
            .with_payload("src/a.ts::first", serde_json::json!({"name": "GetUser"}))
            .with_payload("src/b.ts::second", serde_json::json!({"name": "GetUser"})),
    );
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    let artifact = pipeline.build().await.unwrap();
    assert_eq!(artifact.elements.len(), 2);
}

#[tokio::test]
async fn test_cycle_aborts_pipeline() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "src/a.ts",
        r#"
import { gql } from "@app/graphql";
import { opB } from "./b";
export const opA = gql.default(({ query }) => query.A({ b: opB.embed() }));
"#,
    );
    write_file(
        dir.path(),
        "src/b.ts",
        r#"
import { gql } from "@app/graphql";
import { opA } from "./a";
export const opB = gql.default(({ query }) => query.B({ a: opA.embed() }));
"#,
    );

    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    let err = pipeline.build().await.unwrap_err();
    match err {
        BuildError::CircularDependency { chain } => {
            assert!(chain.contains(&CanonicalId::encode("src/a.ts", "opA")));
            assert!(chain.contains(&CanonicalId::encode("src/b.ts", "opB")));
        }
        other => panic!("expected CircularDependency, got {other}"),
    }
    assert!(!cache::artifact_path(dir.path()).exists());
}

#[tokio::test]
async fn test_evaluation_failure_is_fatal_and_writes_nothing() {
    let dir = two_file_project();
    let pipeline = BuildPipeline::new(config_for(dir.path()), Arc::new(FailingHost));

    let err = pipeline.build().await.unwrap_err();
    assert_eq!(err.code(), "MODULE_EVALUATION_FAILED");
    assert!(!cache::artifact_path(dir.path()).exists());
}

#[tokio::test]
async fn test_corrupt_caches_degrade_to_full_rebuild() {
    let dir = two_file_project();
    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    pipeline.build().await.unwrap();

    std::fs::write(cache::analysis_cache_path(dir.path()), "not json").unwrap();
    std::fs::write(cache::manifest_path(dir.path()), "{\"version\": 999}").unwrap();

    let second = pipeline.build().await.unwrap();
    assert_eq!(second.report.cache.hits, 0);
    assert_eq!(second.report.cache.misses, 2);
    assert_eq!(second.report.cache.skips, 0);
    assert_eq!(second.elements.len(), 2);
}

#[tokio::test]
async fn test_analyzer_diagnostics_surface_as_warnings() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "src/a.ts",
        r#"
import { gql } from "@app/graphql";
export const ok = gql.default(({ query }) => query.Ok({}));
export const bad = gql.default(({ query }) => query.Bad({}), 1);
"#,
    );

    let host = Arc::new(MockExecutionHost::new(dir.path()));
    let pipeline = BuildPipeline::new(config_for(dir.path()), host);

    let artifact = pipeline.build().await.unwrap();
    assert_eq!(artifact.elements.len(), 1);
    assert_eq!(artifact.report.warnings.len(), 1);
    assert!(artifact.report.warnings[0].starts_with("src/a.ts:"));
}

// ── Synthesis / evaluator units ─────────────────────────────

#[test]
fn test_synthesized_chunks_register_in_dependency_order() {
    let analyses = vec![
        analyze_fixture("src/models.ts", MODEL_FILE),
        analyze_fixture("src/queries.ts", OPERATION_FILE),
    ];
    let catalog = DefinitionCatalog::build(&analyses).unwrap();
    let mut warnings = Vec::new();
    let graph = DependencyGraph::build(&analyses, &catalog, &mut warnings).unwrap();
    let order = graph.evaluation_order().unwrap();

    let chunk_set = crate::chunk::synthesize(&catalog, &order);
    // Runtime + two file chunks + entry.
    assert_eq!(chunk_set.len(), 4);

    let model_chunk = chunk_set
        .chunks
        .iter()
        .find(|c| c.id.starts_with("src_models_ts"))
        .unwrap();
    assert!(model_chunk.content.contains("from \"../../src/models.ts\";"));
    assert!(
        model_chunk
            .content
            .contains("register(\"src/models.ts::userModel\", \"model\", \"default\", userModel);")
    );

    // The entry imports the model chunk before the query chunk.
    let entry = chunk_set.chunks.last().unwrap();
    let model_pos = entry.content.find("src_models_ts").unwrap();
    let query_pos = entry.content.find("src_queries_ts").unwrap();
    assert!(model_pos < query_pos);
    assert!(entry.content.contains("drain()"));
}

#[tokio::test]
async fn test_node_host_spawn_failure_is_evaluation_error() {
    use crate::evaluate::NodeExecutionHost;

    let host = NodeExecutionHost::new("trellis-no-such-binary", None);
    let err = host
        .evaluate(Path::new("/nonexistent/entry.mjs"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MODULE_EVALUATION_FAILED");
    assert!(err.to_string().contains("trellis-no-such-binary"));
}

// ── Coordinator / config / manifest units ───────────────────

#[test]
fn test_coordinator_single_flight() {
    let coordinator = BuildCoordinator::new();

    let permit = coordinator.begin("key-a").unwrap();
    let err = coordinator.begin("key-a").unwrap_err();
    assert_eq!(err.code(), "ALREADY_BUILDING");

    // A different configuration key is independent.
    let other = coordinator.begin("key-b").unwrap();
    drop(other);

    drop(permit);
    coordinator.begin("key-a").unwrap();
}

#[test]
fn test_config_key_is_stable_and_distinct() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    assert_eq!(config.config_key(), config.config_key());

    let mut other = config_for(dir.path());
    other.include = vec!["lib/**/*.ts".to_string()];
    assert_ne!(config.config_key(), other.config_key());
}

#[test]
fn test_manifest_version_mismatch_discards() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(&path, "{\"version\": 999, \"chunks\": {}}").unwrap();

    let manifest = ChunkManifest::load(&path);
    assert!(manifest.entry("anything").is_none());
}

#[test]
fn test_config_defaults_without_file() {
    let dir = TempDir::new().unwrap();
    let config = BuildConfig::load(dir.path()).unwrap();
    assert_eq!(config.entry_binding, "gql");
    assert_eq!(config.root, dir.path());
}

#[test]
fn test_config_load_from_toml() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("trellis.toml"),
        r#"
include = ["app/**/*.tsx"]
system_aliases = ["~/graphql"]
entry_binding = "g"
"#,
    )
    .unwrap();

    let config = BuildConfig::load(dir.path()).unwrap();
    assert_eq!(config.include, vec!["app/**/*.tsx".to_string()]);
    assert_eq!(config.system_aliases, vec!["~/graphql".to_string()]);
    assert_eq!(config.entry_binding, "g");
    // Unset fields keep their defaults.
    assert_eq!(config.node_command, "node");
}
