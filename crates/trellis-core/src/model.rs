//! Core data structures for discovered definitions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalId;
use crate::hash::ContentHash;

/// Discriminates what a definition call builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    /// A query, mutation, or subscription document.
    Operation,
    /// A reusable model fragment.
    Model,
    /// A selection slice spliced into operations.
    Slice,
}

/// A dependency reference recorded during analysis.
///
/// Local references resolve within the defining file and carry their target's
/// canonical ID immediately. Imported references can only be resolved once
/// every file is analyzed, so they carry the local binding name and are
/// resolved through the import table during graph construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyRef {
    Local(CanonicalId),
    Imported { local_binding: String },
}

/// One discovered embedded definition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub kind: DefinitionKind,
    pub id: CanonicalId,
    /// Schema label selected by the entry-point call (`gql.<label>(...)`).
    pub schema_label: String,
    /// Exported binding name, when the definition is bound to an export.
    pub export_binding: Option<String>,
    /// Embed/spread references to other definitions.
    pub dependencies: Vec<DependencyRef>,
    /// Source text of the builder call; the execution host evaluates it to
    /// materialize the concrete payload.
    pub expression: String,
    /// 1-based line of the entry-point call.
    pub line: u32,
}

/// Import record: a local binding introduced from a source module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub local: String,
    pub source: String,
    pub imported: String,
}

/// A non-fatal diagnostic attached to a file's analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: u32,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Diagnostic {
            message: message.into(),
            line,
        }
    }
}

/// Per-file analysis result.
///
/// Created fresh each build unless the discovery cache proves the file's
/// content hash unchanged, in which case the prior analysis is reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAnalysis {
    /// Forward-slash normalized path, relative to the build root.
    pub source_path: String,
    pub content_hash: ContentHash,
    /// Definitions in source order.
    pub definitions: Vec<Definition>,
    pub imports: Vec<ImportRecord>,
    /// Local binding name → exported name.
    pub exports: HashMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ModuleAnalysis {
    /// Look up the import that introduced a local binding.
    pub fn import_for_binding(&self, local: &str) -> Option<&ImportRecord> {
        self.imports.iter().find(|i| i.local == local)
    }

    /// Find the definition bound to an exported name.
    pub fn definition_for_export(&self, exported: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|d| d.export_binding.as_deref() == Some(exported))
    }
}
