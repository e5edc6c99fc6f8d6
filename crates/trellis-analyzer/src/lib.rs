//! Source analysis — definition discovery over tree-sitter syntax trees

pub mod analyzer;
pub mod parser_pool;
pub mod scope;
pub mod walk;
pub mod backends;


pub use analyzer::{AnalyzerOptions, SourceAnalyzer};
pub use backends::{JavaScriptAnalyzer, TypeScriptAnalyzer, analyzer_for_path};
pub use parser_pool::{Grammar, ParseRequest, ParseResult, ParserPool, create_parser_pool};
