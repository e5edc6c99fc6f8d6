//! Trellis Builder — discovery, graph, synthesis, evaluation, assembly

pub mod cache;
pub mod config;
pub mod discovery;
pub mod graph;
pub mod chunk;
pub mod evaluate;
pub mod assemble;
pub mod pipeline;

#[cfg(test)]
pub mod tests;

pub use cache::{STATE_DIR, clear_state, state_dir};
pub use config::BuildConfig;
pub use discovery::{AnalysisCache, DiscoveredFile, DiscoveryOutcome};
pub use graph::{DefinitionCatalog, DependencyGraph};
pub use chunk::{Chunk, ChunkManifest, ChunkSet};
pub use evaluate::{
    BuildCoordinator, EvaluationOutput, ExecutionHost, NodeExecutionHost, RawRegistration, Registry,
};
pub use pipeline::BuildPipeline;
