//! Typed error surface for the builder pipeline

use thiserror::Error;

use crate::canonical::{CanonicalId, CanonicalPathError};

/// The single top-level error type a build can fail with.
///
/// Cache and manifest read failures never appear here; they degrade to a full
/// recomputation instead.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid canonical path '{value}': {reason}")]
    CanonicalPathInvalid { value: String, reason: String },

    #[error("circular dependency: {}", chain_display(.chain))]
    CircularDependency { chain: Vec<CanonicalId> },

    #[error("duplicate operation name '{name}' for schema '{schema}': {first} and {second}")]
    DuplicateOperationName {
        name: String,
        schema: String,
        first: CanonicalId,
        second: CanonicalId,
    },

    #[error("evaluation of '{module_path}' failed: {message}")]
    ModuleEvaluationFailed { module_path: String, message: String },

    #[error("duplicate canonical id '{id}' across module analyses")]
    DuplicateCanonicalId { id: CanonicalId },

    #[error("dangling dependency edge {from} -> {to}")]
    DanglingReference { from: CanonicalId, to: CanonicalId },

    #[error("artifact failed schema validation: {reason}")]
    ArtifactInvalid { reason: String },

    #[error("a build is already in flight for configuration '{config_key}'")]
    AlreadyBuilding { config_key: String },

    #[error("analysis of '{path}' failed: {message}")]
    Analysis { path: String, message: String },

    #[error("invalid build configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Construct from a failed canonical-path decode.
    pub fn canonical_path(value: &str, err: CanonicalPathError) -> Self {
        BuildError::CanonicalPathInvalid {
            value: value.to_string(),
            reason: err.reason().to_string(),
        }
    }

    /// Stable error code for programmatic handling and log grep-ability.
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::CanonicalPathInvalid { .. } => "CANONICAL_PATH_INVALID",
            BuildError::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            BuildError::DuplicateOperationName { .. } => "DUPLICATE_OPERATION_NAME",
            BuildError::ModuleEvaluationFailed { .. } => "MODULE_EVALUATION_FAILED",
            BuildError::DuplicateCanonicalId { .. } => "DUPLICATE_CANONICAL_ID",
            BuildError::DanglingReference { .. } => "DANGLING_REFERENCE",
            BuildError::ArtifactInvalid { .. } => "ARTIFACT_INVALID",
            BuildError::AlreadyBuilding { .. } => "ALREADY_BUILDING",
            BuildError::Analysis { .. } => "ANALYSIS_FAILED",
            BuildError::Config { .. } => "CONFIG_INVALID",
            BuildError::Io(_) => "IO_ERROR",
        }
    }
}

fn chain_display(chain: &[CanonicalId]) -> String {
    chain
        .iter()
        .map(CanonicalId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
