//! Analyzer backends, one per tree-sitter grammar family

pub mod javascript;
pub mod typescript;

use std::path::Path;
use std::sync::Arc;

pub use javascript::JavaScriptAnalyzer;
pub use typescript::TypeScriptAnalyzer;

use crate::analyzer::{AnalyzerOptions, SourceAnalyzer};
use crate::parser_pool::ParserPool;

/// Pick the backend responsible for a path, if any.
pub fn analyzer_for_path(
    path: &Path,
    pool: &ParserPool,
    options: &AnalyzerOptions,
) -> Option<Arc<dyn SourceAnalyzer>> {
    let ts = TypeScriptAnalyzer::new(pool.clone(), options.clone());
    if ts.handles(path) {
        return Some(Arc::new(ts));
    }
    let js = JavaScriptAnalyzer::new(pool.clone(), options.clone());
    if js.handles(path) {
        return Some(Arc::new(js));
    }
    None
}
