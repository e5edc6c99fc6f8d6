//! TypeScript analyzer backend

use std::path::{Path, PathBuf};

use trellis_core::{BuildError, ModuleAnalysis};

use crate::analyzer::{AnalyzerOptions, SourceAnalyzer};
use crate::parser_pool::{Grammar, ParseRequest, ParserPool};
use crate::walk::analyze_tree;

/// Backend over the tree-sitter TypeScript grammars. `.tsx` files parse with
/// the TSX grammar; plain `.ts` with the TypeScript grammar.
pub struct TypeScriptAnalyzer {
    pool: ParserPool,
    options: AnalyzerOptions,
}

impl TypeScriptAnalyzer {
    pub fn new(pool: ParserPool, options: AnalyzerOptions) -> Self {
        Self { pool, options }
    }

    fn grammar_for(source_path: &str) -> Grammar {
        if source_path.ends_with(".tsx") {
            Grammar::Tsx
        } else {
            Grammar::TypeScript
        }
    }
}

impl SourceAnalyzer for TypeScriptAnalyzer {
    fn analyze(&self, source_path: &str, source: &str) -> Result<ModuleAnalysis, BuildError> {
        let parsed = self
            .pool
            .parse_blocking(ParseRequest {
                grammar: Self::grammar_for(source_path),
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
        "typescript"
    }

    fn handles(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("ts") | Some("tsx")
        )
    }
}
