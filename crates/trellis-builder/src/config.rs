//! Build configuration loaded from trellis.toml

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use trellis_core::ContentHash;
use trellis_analyzer::AnalyzerOptions;

/// Name of the config file looked up at the build root.
pub const CONFIG_FILE: &str = "trellis.toml";

/// Configuration for one build root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Build root; not read from the file, set at load time.
    #[serde(skip)]
    pub root: PathBuf,

    /// Include globs, relative to the root.
    pub include: Vec<String>,

    /// Module specifiers that resolve to the graphql system module.
    pub system_aliases: Vec<String>,

    /// Name of the entry-point export.
    pub entry_binding: String,

    /// Command used to evaluate the synthesized module.
    pub node_command: String,

    /// Evaluation timeout in milliseconds. Zero disables the timeout.
    pub evaluation_timeout_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            root: PathBuf::from("."),
            include: vec!["src/**/*.{ts,tsx,js,jsx}".to_string()],
            system_aliases: vec!["@app/graphql".to_string()],
            entry_binding: "gql".to_string(),
            node_command: "node".to_string(),
            evaluation_timeout_ms: 60_000,
        }
    }
}

impl BuildConfig {
    /// Load `trellis.toml` from the root, falling back to defaults when the
    /// file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            tracing::debug!("no {} found, using defaults", CONFIG_FILE);
            BuildConfig::default()
        };
        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Stable key identifying this configuration. Builds for the same key are
    /// serialized; different keys run independently.
    pub fn config_key(&self) -> String {
        let identity = format!(
            "{}|{}|{}|{}",
            self.root.display(),
            self.include.join(","),
            self.system_aliases.join(","),
            self.entry_binding,
        );
        ContentHash::of_str(&identity).as_str()[..16].to_string()
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            system_aliases: self.system_aliases.clone(),
            entry_binding: self.entry_binding.clone(),
        }
    }
}
