//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use trellis_builder::{BuildConfig, BuildPipeline, NodeExecutionHost};

pub async fn build(root: PathBuf) -> anyhow::Result<()> {
    let config = BuildConfig::load(&root)?;
    let timeout = (config.evaluation_timeout_ms > 0)
        .then(|| Duration::from_millis(config.evaluation_timeout_ms));
    let host = Arc::new(NodeExecutionHost::new(config.node_command.clone(), timeout));

    let pipeline = BuildPipeline::new(config, host);
    let artifact = pipeline.build().await?;

    for warning in &artifact.report.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::info!(
        "artifact: {} elements (cache: {} hits, {} misses, {} skips) in {}ms",
        artifact.elements.len(),
        artifact.report.cache.hits,
        artifact.report.cache.misses,
        artifact.report.cache.skips,
        artifact.report.duration_ms
    );

    Ok(())
}

pub fn clear(root: PathBuf) -> anyhow::Result<()> {
    tracing::info!("Clearing builder state for: {}", root.display());

    trellis_builder::clear_state(&root)?;

    tracing::info!("State cleared");
    Ok(())
}
