//! JavaScript analyzer backend

use std::path::{Path, PathBuf};

use trellis_core::{BuildError, ModuleAnalysis};

use crate::analyzer::{AnalyzerOptions, SourceAnalyzer};
use crate::parser_pool::{Grammar, ParseRequest, ParserPool};
use crate::walk::analyze_tree;

/// Backend over the tree-sitter JavaScript grammar.
pub struct JavaScriptAnalyzer {
    pool: ParserPool,
    options: AnalyzerOptions,
}

impl JavaScriptAnalyzer {
    pub fn new(pool: ParserPool, options: AnalyzerOptions) -> Self {
        Self { pool, options }
    }
}

impl SourceAnalyzer for JavaScriptAnalyzer {
    fn analyze(&self, source_path: &str, source: &str) -> Result<ModuleAnalysis, BuildError> {
        let parsed = self
            .pool
            .parse_blocking(ParseRequest {
                grammar: Grammar::JavaScript,
                content: source.to_string(),
                path: PathBuf::from(source_path),
            })
            .map_err(|e| BuildError::Analysis {
                path: source_path.to_string(),
                message: e.to_string(),
            })?;

        analyze_tree(&parsed.tree, source, source_path, &self.options)
    }

    fn name(&self) -> &'static str {
        "javascript"
    }

    fn handles(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js") | Some("jsx") | Some("mjs") | Some("cjs")
        )
    }
}
