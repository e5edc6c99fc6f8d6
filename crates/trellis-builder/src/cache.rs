//! On-disk layout of per-build-root state

use std::path::{Path, PathBuf};

/// State directory: .trellis/
pub const STATE_DIR: &str = ".trellis";

/// Analysis cache file name.
pub const ANALYSIS_CACHE: &str = "analysis-cache.json";

/// Chunk output directory name (also holds the chunk manifest).
pub const CHUNKS_DIR: &str = "chunks";

/// Default artifact file name.
pub const ARTIFACT_FILE: &str = "artifact.json";

/// Get state directory path.
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// Get analysis cache file path.
pub fn analysis_cache_path(root: &Path) -> PathBuf {
    state_dir(root).join(ANALYSIS_CACHE)
}

/// Get chunk output directory path.
pub fn chunks_dir(root: &Path) -> PathBuf {
    state_dir(root).join(CHUNKS_DIR)
}

/// Get chunk manifest file path.
pub fn manifest_path(root: &Path) -> PathBuf {
    chunks_dir(root).join("manifest.json")
}

/// Get default artifact output path.
pub fn artifact_path(root: &Path) -> PathBuf {
    state_dir(root).join(ARTIFACT_FILE)
}

/// Ensure the state and chunk directories exist.
pub fn ensure_state_dirs(root: &Path) -> std::io::Result<()> {
    let chunks = chunks_dir(root);
    if !chunks.exists() {
        std::fs::create_dir_all(&chunks)?;
    }
    Ok(())
}

/// Clear all per-root builder state.
pub fn clear_state(root: &Path) -> std::io::Result<()> {
    let state = state_dir(root);
    if state.exists() {
        std::fs::remove_dir_all(&state)?;
    }
    Ok(())
}
