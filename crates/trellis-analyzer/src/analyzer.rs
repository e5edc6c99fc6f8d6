//! Analyzer trait and shared options

use std::path::Path;

use trellis_core::{BuildError, ModuleAnalysis};

/// How the analyzer recognizes the definition entry point.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Module specifiers that resolve to the graphql system module.
    /// A specifier matches when it equals an alias or extends it with `/`.
    pub system_aliases: Vec<String>,
    /// Name of the entry-point export; the binding must keep this name.
    pub entry_binding: String,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            system_aliases: vec!["@app/graphql".to_string()],
            entry_binding: "gql".to_string(),
        }
    }
}

impl AnalyzerOptions {
    /// Check whether an import specifier points at the system module.
    pub fn is_system_specifier(&self, specifier: &str) -> bool {
        self.system_aliases
            .iter()
            .any(|alias| specifier == alias || specifier.starts_with(&format!("{alias}/")))
    }
}

/// One interchangeable analysis backend.
///
/// Backends must produce byte-identical canonical IDs, dependency references,
/// and export tables for any file all of them can parse; the fixture corpus
/// in this crate's tests asserts that equivalence.
pub trait SourceAnalyzer: Send + Sync {
    /// Parse one file's text and walk it into a `ModuleAnalysis`.
    ///
    /// `source_path` must already be the forward-slash path used in canonical
    /// IDs, relative to the build root.
    fn analyze(&self, source_path: &str, source: &str) -> Result<ModuleAnalysis, BuildError>;

    /// Backend name, for logs and the cross-backend equivalence tests.
    fn name(&self) -> &'static str;

    /// Whether this backend can parse the given file.
    fn handles(&self, path: &Path) -> bool;
}
