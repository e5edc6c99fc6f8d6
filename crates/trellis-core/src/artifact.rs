//! Builder artifact — the durable output of one successful build

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalId;
use crate::error::BuildError;
use crate::hash::ContentHash;
use crate::model::DefinitionKind;

/// Version stamp of the on-disk artifact format. Bump on any shape change.
pub const ARTIFACT_VERSION: u32 = 1;

/// Static + evaluated metadata for one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMetadata {
    pub source_path: String,
    pub source_content_hash: ContentHash,
    pub payload_content_hash: ContentHash,
}

/// One fully materialized definition, keyed by canonical ID in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderArtifactElement {
    pub canonical_id: CanonicalId,
    pub kind: DefinitionKind,
    pub payload: serde_json::Value,
    pub metadata: ElementMetadata,
}

/// Cache counters for the build report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    pub skips: u32,
}

/// Summary of one build run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    pub cache: CacheStats,
    pub built_at: String,
}

/// Content-addressed map from canonical ID to ready-to-ship payload.
///
/// The artifact is the sole contract boundary to downstream code
/// transformers; it is only ever written after validation succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderArtifact {
    pub version: u32,
    pub elements: BTreeMap<CanonicalId, BuilderArtifactElement>,
    pub report: BuildReport,
}

impl BuilderArtifact {
    /// Validate the artifact against its schema.
    ///
    /// A failure here indicates an internal pipeline bug, never a user error.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.version != ARTIFACT_VERSION {
            return Err(BuildError::ArtifactInvalid {
                reason: format!(
                    "version {} does not match supported version {}",
                    self.version, ARTIFACT_VERSION
                ),
            });
        }
        for (key, element) in &self.elements {
            if key != &element.canonical_id {
                return Err(BuildError::ArtifactInvalid {
                    reason: format!(
                        "element key '{}' disagrees with element canonical id '{}'",
                        key, element.canonical_id
                    ),
                });
            }
            if let Err(err) = key.decode() {
                return Err(BuildError::ArtifactInvalid {
                    reason: format!("element key '{}' is not a canonical id: {}", key, err),
                });
            }
            if element.payload.is_null() {
                return Err(BuildError::ArtifactInvalid {
                    reason: format!("element '{}' has a null payload", key),
                });
            }
            let expected = ContentHash::of_json(&element.payload);
            if element.metadata.payload_content_hash != expected {
                return Err(BuildError::ArtifactInvalid {
                    reason: format!("element '{}' payload hash does not match payload", key),
                });
            }
        }
        Ok(())
    }

    /// Validate and write the artifact as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), BuildError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| BuildError::ArtifactInvalid {
            reason: format!("serialization failed: {e}"),
        })?;
        std::fs::write(path, json)?;
        tracing::debug!("artifact written: {}", path.display());
        Ok(())
    }

    /// Load and validate a previously written artifact.
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let json = std::fs::read_to_string(path)?;
        let artifact: BuilderArtifact =
            serde_json::from_str(&json).map_err(|e| BuildError::ArtifactInvalid {
                reason: format!("deserialization failed: {e}"),
            })?;
        artifact.validate()?;
        Ok(artifact)
    }
}
