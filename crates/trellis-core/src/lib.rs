//! Trellis Core — definition model, canonical identity, and artifact types

pub mod canonical;
pub mod hash;
pub mod model;
pub mod error;
pub mod artifact;

#[cfg(test)]
pub mod tests;

pub use canonical::{CanonicalId, CanonicalPathError, SEPARATOR};
pub use hash::ContentHash;
pub use model::{Definition, DefinitionKind, DependencyRef, Diagnostic, ImportRecord, ModuleAnalysis};
pub use error::BuildError;
pub use artifact::{ARTIFACT_VERSION, BuildReport, BuilderArtifact, BuilderArtifactElement, CacheStats, ElementMetadata};
