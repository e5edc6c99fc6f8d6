//! Unit tests for trellis-core

use std::collections::BTreeMap;

use crate::artifact::*;
use crate::canonical::{CanonicalId, CanonicalPathError};
use crate::error::BuildError;
use crate::hash::ContentHash;
use crate::model::*;

#[test]
fn test_canonical_round_trip() {
    let id = CanonicalId::encode("src/queries/user.ts", "getUser");
    assert_eq!(id.as_str(), "src/queries/user.ts::getUser");

    let (file, scope) = id.decode().unwrap();
    assert_eq!(file, "src/queries/user.ts");
    assert_eq!(scope, "getUser");
}

#[test]
fn test_canonical_normalizes_backslashes() {
    let id = CanonicalId::encode("src\\queries\\user.ts", "getUser");
    assert_eq!(id.file_path(), "src/queries/user.ts");
}

#[test]
fn test_canonical_decode_failures() {
    let missing = CanonicalId::parse("no-separator-here").unwrap_err();
    assert_eq!(missing, CanonicalPathError::MissingSeparator);
    assert!(missing.reason().contains("separator"));

    let empty_file = CanonicalId::parse("::scope").unwrap_err();
    assert_eq!(empty_file, CanonicalPathError::EmptyFilePath);
    assert!(empty_file.reason().contains("file path"));

    let empty_scope = CanonicalId::parse("file.ts::").unwrap_err();
    assert_eq!(empty_scope, CanonicalPathError::EmptyScopePath);
    assert!(empty_scope.reason().contains("scope path"));
}

#[test]
fn test_canonical_scope_path_with_dots() {
    // Scope paths contain dots and occurrence suffixes; only `::` splits.
    let id = CanonicalId::encode("a.ts", "outer.inner.arrow#0$1");
    let (file, scope) = id.decode().unwrap();
    assert_eq!(file, "a.ts");
    assert_eq!(scope, "outer.inner.arrow#0$1");
}

#[test]
fn test_content_hash_deterministic() {
    let a = ContentHash::of_str("const q = 1;");
    let b = ContentHash::of_str("const q = 1;");
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 64);

    let c = ContentHash::of_str("const q = 2;");
    assert_ne!(a, c);
}

#[test]
fn test_build_error_codes() {
    let err = BuildError::CircularDependency {
        chain: vec![
            CanonicalId::encode("a.ts", "x"),
            CanonicalId::encode("b.ts", "y"),
            CanonicalId::encode("a.ts", "x"),
        ],
    };
    assert_eq!(err.code(), "CIRCULAR_DEPENDENCY");
    let message = err.to_string();
    assert!(message.contains("a.ts::x -> b.ts::y -> a.ts::x"));

    let err = BuildError::canonical_path("bogus", CanonicalPathError::MissingSeparator);
    assert_eq!(err.code(), "CANONICAL_PATH_INVALID");
    assert!(err.to_string().contains("missing '::' separator"));
}

#[test]
fn test_module_analysis_lookups() {
    let definition = Definition {
        kind: DefinitionKind::Model,
        id: CanonicalId::encode("a.ts", "userModel"),
        schema_label: "default".to_string(),
        export_binding: Some("userModel".to_string()),
        dependencies: vec![],
        expression: "model.User(() => ({}))".to_string(),
        line: 3,
    };
    let analysis = ModuleAnalysis {
        source_path: "a.ts".to_string(),
        content_hash: ContentHash::of_str("x"),
        definitions: vec![definition.clone()],
        imports: vec![ImportRecord {
            local: "helper".to_string(),
            source: "./helper".to_string(),
            imported: "helper".to_string(),
        }],
        exports: [("userModel".to_string(), "userModel".to_string())].into(),
        diagnostics: vec![],
    };

    assert_eq!(
        analysis.import_for_binding("helper").map(|i| i.source.as_str()),
        Some("./helper")
    );
    assert_eq!(analysis.definition_for_export("userModel"), Some(&definition));
    assert!(analysis.definition_for_export("missing").is_none());
}

fn sample_element(id: CanonicalId, payload: serde_json::Value) -> BuilderArtifactElement {
    let payload_hash = ContentHash::of_json(&payload);
    BuilderArtifactElement {
        canonical_id: id,
        kind: DefinitionKind::Operation,
        payload,
        metadata: ElementMetadata {
            source_path: "a.ts".to_string(),
            source_content_hash: ContentHash::of_str("source"),
            payload_content_hash: payload_hash,
        },
    }
}

fn sample_artifact() -> BuilderArtifact {
    let id = CanonicalId::encode("a.ts", "getUser");
    let mut elements = BTreeMap::new();
    elements.insert(
        id.clone(),
        sample_element(id, serde_json::json!({"document": "query GetUser { user { id } }"})),
    );
    BuilderArtifact {
        version: ARTIFACT_VERSION,
        elements,
        report: BuildReport {
            duration_ms: 12,
            warnings: vec![],
            cache: CacheStats::default(),
            built_at: chrono::Utc::now().to_rfc3339(),
        },
    }
}

#[test]
fn test_artifact_validate_ok() {
    assert!(sample_artifact().validate().is_ok());
}

#[test]
fn test_artifact_validate_rejects_version_mismatch() {
    let mut artifact = sample_artifact();
    artifact.version = ARTIFACT_VERSION + 1;
    let err = artifact.validate().unwrap_err();
    assert_eq!(err.code(), "ARTIFACT_INVALID");
}

#[test]
fn test_artifact_validate_rejects_key_mismatch() {
    let mut artifact = sample_artifact();
    let rogue = sample_element(
        CanonicalId::encode("b.ts", "other"),
        serde_json::json!({"document": "query Other { id }"}),
    );
    artifact.elements.insert(CanonicalId::encode("a.ts", "wrongKey"), rogue);
    assert!(artifact.validate().is_err());
}

#[test]
fn test_artifact_validate_rejects_stale_payload_hash() {
    let mut artifact = sample_artifact();
    let (_, element) = artifact.elements.iter_mut().next().unwrap();
    element.payload = serde_json::json!({"document": "query Tampered { id }"});
    assert!(artifact.validate().is_err());
}

#[test]
fn test_artifact_save_load_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("out").join("artifact.json");

    let artifact = sample_artifact();
    artifact.save(&path).unwrap();

    let loaded = BuilderArtifact::load(&path).unwrap();
    assert_eq!(loaded, artifact);
}
