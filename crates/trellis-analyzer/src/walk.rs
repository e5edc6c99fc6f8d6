//! Shared syntax-tree walk producing a `ModuleAnalysis`
//!
//! Both analyzer backends parse with different tree-sitter grammars but feed
//! the same walker; the JavaScript and TypeScript grammars share node kind
//! names for every construct the walker inspects, which is what makes the
//! backends interchangeable.

use std::collections::HashMap;

use tree_sitter::Node;

use trellis_core::{
    BuildError, CanonicalId, ContentHash, Definition, DefinitionKind, DependencyRef, Diagnostic,
    ImportRecord, ModuleAnalysis,
};

use crate::analyzer::AnalyzerOptions;
use crate::scope::{ScopeKind, ScopeTracker, ensure_unique_scope_paths};

/// Walk a parsed tree into a per-file analysis.
pub fn analyze_tree(
    tree: &tree_sitter::Tree,
    source: &str,
    source_path: &str,
    options: &AnalyzerOptions,
) -> Result<ModuleAnalysis, BuildError> {
    let root = tree.root_node();
    if root.has_error() {
        return Err(BuildError::Analysis {
            path: source_path.to_string(),
            message: format!("syntax error near line {}", first_error_line(root)),
        });
    }

    let mut walker = Walker {
        source,
        source_path,
        options,
        scopes: ScopeTracker::new(),
        imports: Vec::new(),
        exports: HashMap::new(),
        entry_binding: None,
        suspect_bindings: HashMap::new(),
        local_bindings: HashMap::new(),
        definitions: Vec::new(),
        diagnostics: Vec::new(),
    };

    walker.collect_module_bindings(root);
    walker.walk(root);

    let mut definitions = walker.definitions;
    ensure_unique_scope_paths(source_path, &mut definitions);

    Ok(ModuleAnalysis {
        source_path: source_path.to_string(),
        content_hash: ContentHash::of_str(source),
        definitions,
        imports: walker.imports,
        exports: walker.exports,
        diagnostics: walker.diagnostics,
    })
}

struct Walker<'a> {
    source: &'a str,
    source_path: &'a str,
    options: &'a AnalyzerOptions,
    scopes: ScopeTracker,
    imports: Vec<ImportRecord>,
    /// Local binding name → exported name.
    exports: HashMap<String, String>,
    /// Local binding of the entry-point import, when imported un-renamed.
    entry_binding: Option<String>,
    /// System-module bindings that must not be used as an entry point,
    /// mapped to the reason calls through them are skipped.
    suspect_bindings: HashMap<String, &'static str>,
    /// Top-level bindings of definitions already discovered in this file.
    local_bindings: HashMap<String, CanonicalId>,
    definitions: Vec<Definition>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    fn line(&self, node: Node) -> u32 {
        node.start_position().row as u32 + 1
    }

    fn diagnostic(&mut self, node: Node, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(message, self.line(node)));
    }

    // ── Module-level binding collection ─────────────────────

    /// First pass over the module body: imports, export table, and the
    /// entry-point binding. Export bindings must be known before the walk so
    /// a definition can be attributed to its export regardless of statement
    /// order (`export { q }` may follow the declaration).
    fn collect_module_bindings(&mut self, root: Node) {
        let mut cursor = root.walk();
        for item in root.named_children(&mut cursor) {
            match item.kind() {
                "import_statement" => self.collect_import(item),
                "export_statement" => self.collect_export(item),
                "expression_statement" => {
                    if let Some(expr) = item.named_child(0) {
                        if expr.kind() == "assignment_expression" {
                            if let Some(name) = self.commonjs_export_name(expr) {
                                self.exports.insert(name.clone(), name);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_import(&mut self, import: Node) {
        let Some(source_node) = import.child_by_field_name("source") else {
            return;
        };
        let specifier = string_value(self.text(source_node));
        let is_system = self.options.is_system_specifier(&specifier);

        let mut cursor = import.walk();
        for child in import.named_children(&mut cursor) {
            if child.kind() != "import_clause" {
                continue;
            }
            let mut clause_cursor = child.walk();
            for clause in child.named_children(&mut clause_cursor) {
                match clause.kind() {
                    "named_imports" => {
                        let mut spec_cursor = clause.walk();
                        for spec in clause.named_children(&mut spec_cursor) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let Some(name_node) = spec.child_by_field_name("name") else {
                                continue;
                            };
                            let imported = string_value(self.text(name_node));
                            let local = spec
                                .child_by_field_name("alias")
                                .map(|a| self.text(a).to_string())
                                .unwrap_or_else(|| imported.clone());

                            if is_system && imported == self.options.entry_binding {
                                if local == imported {
                                    self.entry_binding = Some(local.clone());
                                } else {
                                    self.suspect_bindings
                                        .insert(local.clone(), "renamed entry-point import");
                                }
                            }
                            self.imports.push(ImportRecord {
                                local,
                                source: specifier.clone(),
                                imported,
                            });
                        }
                    }
                    "namespace_import" => {
                        let mut ns_cursor = clause.walk();
                        for ns_child in clause.named_children(&mut ns_cursor) {
                            if ns_child.kind() == "identifier" {
                                let local = self.text(ns_child).to_string();
                                if is_system {
                                    self.suspect_bindings
                                        .insert(local.clone(), "namespace import of the system module");
                                }
                                self.imports.push(ImportRecord {
                                    local,
                                    source: specifier.clone(),
                                    imported: "*".to_string(),
                                });
                            }
                        }
                    }
                    "identifier" => {
                        // Default import.
                        self.imports.push(ImportRecord {
                            local: self.text(clause).to_string(),
                            source: specifier.clone(),
                            imported: "default".to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }
    }

    fn collect_export(&mut self, export: Node) {
        // Re-exports (`export { a } from "./b"`) introduce no local binding.
        if export.child_by_field_name("source").is_some() {
            return;
        }

        if let Some(decl) = export.child_by_field_name("declaration") {
            match decl.kind() {
                "lexical_declaration" | "variable_declaration" => {
                    let mut cursor = decl.walk();
                    for declarator in decl.named_children(&mut cursor) {
                        if declarator.kind() != "variable_declarator" {
                            continue;
                        }
                        if let Some(name) = declarator.child_by_field_name("name") {
                            if name.kind() == "identifier" {
                                let name = self.text(name).to_string();
                                self.exports.insert(name.clone(), name);
                            }
                        }
                    }
                }
                "function_declaration" | "class_declaration" => {
                    if let Some(name) = decl.child_by_field_name("name") {
                        let name = self.text(name).to_string();
                        self.exports.insert(name.clone(), name);
                    }
                }
                _ => {}
            }
            return;
        }

        let mut cursor = export.walk();
        for child in export.named_children(&mut cursor) {
            if child.kind() != "export_clause" {
                continue;
            }
            let mut spec_cursor = child.walk();
            for spec in child.named_children(&mut spec_cursor) {
                if spec.kind() != "export_specifier" {
                    continue;
                }
                let Some(name_node) = spec.child_by_field_name("name") else {
                    continue;
                };
                let local = string_value(self.text(name_node));
                let exported = spec
                    .child_by_field_name("alias")
                    .map(|a| string_value(self.text(a)))
                    .unwrap_or_else(|| local.clone());
                self.exports.insert(local, exported);
            }
        }
    }

    /// `exports.foo = ...` / `module.exports.foo = ...` → `foo`.
    fn commonjs_export_name(&self, assign: Node) -> Option<String> {
        let left = assign.child_by_field_name("left")?;
        if left.kind() != "member_expression" {
            return None;
        }
        let object = left.child_by_field_name("object")?;
        let property = left.child_by_field_name("property")?;
        if property.kind() != "property_identifier" {
            return None;
        }

        let is_exports = object.kind() == "identifier" && self.text(object) == "exports";
        let is_module_exports = object.kind() == "member_expression"
            && object
                .child_by_field_name("object")
                .is_some_and(|o| o.kind() == "identifier" && self.text(o) == "module")
            && object
                .child_by_field_name("property")
                .is_some_and(|p| self.text(p) == "exports");

        if is_exports || is_module_exports {
            Some(self.text(property).to_string())
        } else {
            None
        }
    }

    // ── Scoped walk ─────────────────────────────────────────

    fn walk(&mut self, node: Node) {
        match node.kind() {
            "variable_declarator" => {
                let name = node
                    .child_by_field_name("name")
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| self.text(n).to_string());
                if let Some(name) = name {
                    self.scopes.enter(ScopeKind::Variable, name);
                    self.walk_children(node);
                    self.scopes.exit();
                } else {
                    self.walk_children(node);
                }
            }
            "function_declaration" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_else(|| self.scopes.anonymous_segment("function"));
                self.scopes.enter(ScopeKind::Function, name);
                self.walk_children(node);
                self.scopes.exit();
            }
            "function_expression" | "function" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_else(|| self.scopes.anonymous_segment("function"));
                self.scopes.enter(ScopeKind::Function, name);
                self.walk_children(node);
                self.scopes.exit();
            }
            "arrow_function" => {
                let segment = self.scopes.anonymous_segment("arrow");
                self.scopes.enter(ScopeKind::Expression, segment);
                self.walk_children(node);
                self.scopes.exit();
            }
            "class_declaration" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_else(|| self.scopes.anonymous_segment("class"));
                self.scopes.enter(ScopeKind::Class, name);
                self.walk_children(node);
                self.scopes.exit();
            }
            "method_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .filter(|n| n.kind() == "property_identifier")
                    .map(|n| self.text(n).to_string());
                if let Some(name) = name {
                    self.scopes.enter(ScopeKind::Method, name);
                    self.walk_children(node);
                    self.scopes.exit();
                } else {
                    self.walk_children(node);
                }
            }
            "pair" => {
                let name = node.child_by_field_name("key").and_then(|key| match key.kind() {
                    "property_identifier" => Some(self.text(key).to_string()),
                    "string" => Some(string_value(self.text(key))),
                    _ => None,
                });
                if let Some(name) = name {
                    self.scopes.enter(ScopeKind::Property, name);
                    self.walk_children(node);
                    self.scopes.exit();
                } else {
                    self.walk_children(node);
                }
            }
            "assignment_expression" => {
                if let Some(name) = self.commonjs_export_name(node) {
                    self.scopes.enter(ScopeKind::Variable, name);
                    self.walk_children(node);
                    self.scopes.exit();
                } else {
                    self.walk_children(node);
                }
            }
            "call_expression" => {
                if self.try_process_entry_call(node) {
                    // A definition call's body is the builder expression;
                    // nested definitions are not discovered inside it.
                    return;
                }
                self.walk_children(node);
            }
            _ => self.walk_children(node),
        }
    }

    fn walk_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child);
        }
    }

    // ── Definition-call recognition ─────────────────────────

    /// Returns true when the call was recognized (and either recorded or
    /// skipped with a diagnostic) as an entry-point definition call.
    fn try_process_entry_call(&mut self, call: Node) -> bool {
        let Some(callee) = call.child_by_field_name("function") else {
            return false;
        };

        // Computed property access: `gql["default"](...)`.
        if callee.kind() == "subscript_expression" {
            if let Some(object) = callee.child_by_field_name("object") {
                if object.kind() == "identifier" && self.is_entry_reference(self.text(object)) {
                    self.diagnostic(
                        call,
                        "definition call skipped: computed property access on the entry binding",
                    );
                    return true;
                }
            }
            return false;
        }

        if callee.kind() != "member_expression" {
            return false;
        }
        let Some(object) = callee.child_by_field_name("object") else {
            return false;
        };
        let Some(property) = callee.child_by_field_name("property") else {
            return false;
        };

        // Calls through a namespace import or renamed binding of the system
        // module are deviations, not definitions.
        if let Some(reason) = self.suspect_reason(object) {
            self.diagnostic(call, format!("definition call skipped: {reason}"));
            return true;
        }

        if object.kind() != "identifier" || !self.is_entry_reference(self.text(object)) {
            return false;
        }

        if property.kind() != "property_identifier" {
            self.diagnostic(
                call,
                "definition call skipped: schema must be selected by a static property name",
            );
            return true;
        }
        let schema_label = self.text(property).to_string();

        let Some(builder_fn) = self.single_builder_argument(call) else {
            // Diagnostic already recorded.
            return true;
        };

        self.record_definition(call, schema_label, builder_fn);
        true
    }

    fn is_entry_reference(&self, name: &str) -> bool {
        self.entry_binding.as_deref() == Some(name)
    }

    /// Reason calls through this object must be skipped, if any. Handles both
    /// a direct suspect identifier and `ns.gql` chains rooted in one.
    fn suspect_reason(&self, object: Node) -> Option<&'static str> {
        match object.kind() {
            "identifier" => self.suspect_bindings.get(self.text(object)).copied(),
            "member_expression" => {
                let inner = object.child_by_field_name("object")?;
                self.suspect_reason(inner)
            }
            _ => None,
        }
    }

    /// Validate the argument list shape: exactly one non-spread function.
    fn single_builder_argument<'t>(&mut self, call: Node<'t>) -> Option<Node<'t>> {
        let Some(arguments) = call.child_by_field_name("arguments") else {
            self.diagnostic(call, "definition call skipped: missing argument list");
            return None;
        };
        let mut cursor = arguments.walk();
        let args: Vec<Node> = arguments.named_children(&mut cursor).collect();

        if args.iter().any(|a| a.kind() == "spread_element") {
            self.diagnostic(call, "definition call skipped: spread argument");
            return None;
        }
        if args.len() != 1 {
            self.diagnostic(
                call,
                format!(
                    "definition call skipped: expected exactly one builder function argument, found {}",
                    args.len()
                ),
            );
            return None;
        }
        let arg = args[0];
        match arg.kind() {
            "arrow_function" | "function_expression" | "function" => Some(arg),
            _ => {
                self.diagnostic(
                    call,
                    "definition call skipped: argument must be an arrow function or function expression",
                );
                None
            }
        }
    }

    // ── Definition recording ────────────────────────────────

    fn record_definition(&mut self, call: Node, schema_label: String, builder_fn: Node) {
        let Some(builder_call) = builder_call_of(builder_fn) else {
            self.diagnostic(
                call,
                "definition call skipped: builder function must return a builder call",
            );
            return;
        };
        let Some(kind) = self.builder_kind(builder_call) else {
            self.diagnostic(
                call,
                "definition call skipped: unrecognized builder namespace",
            );
            return;
        };

        let scope_path = self.scopes.register_occurrence();
        if scope_path.is_empty() {
            self.diagnostic(
                call,
                "definition call skipped: call is not attached to any named scope",
            );
            return;
        }

        let export_binding = self.top_level_export_binding();
        let Some(export_binding_name) = export_binding else {
            self.diagnostic(
                call,
                format!(
                    "definition '{scope_path}' skipped: not bound to an exported top-level binding"
                ),
            );
            return;
        };

        let mut dependencies = Vec::new();
        self.collect_dependency_refs(builder_fn, &mut dependencies);

        let id = CanonicalId::encode(self.source_path, &scope_path);
        if let Some(frame) = self.scopes.top() {
            if frame.kind == ScopeKind::Variable && self.scopes.depth() == 1 {
                self.local_bindings.insert(frame.segment.clone(), id.clone());
            }
        }

        tracing::debug!(
            "discovered {:?} definition {} (schema '{}')",
            kind,
            id,
            schema_label
        );

        self.definitions.push(Definition {
            kind,
            id,
            schema_label,
            export_binding: Some(export_binding_name),
            dependencies,
            expression: self.text(call).to_string(),
            line: self.line(call),
        });
    }

    /// Exported name of the binding this definition is being assigned to,
    /// when the walk position is a top-level variable (or CommonJS export)
    /// frame whose name appears in the export table.
    fn top_level_export_binding(&self) -> Option<String> {
        if self.scopes.depth() != 1 {
            return None;
        }
        let frame = self.scopes.top()?;
        if frame.kind != ScopeKind::Variable {
            return None;
        }
        self.exports.get(&frame.segment).cloned()
    }

    fn builder_kind(&self, builder_call: Node) -> Option<DefinitionKind> {
        let callee = builder_call.child_by_field_name("function")?;
        if callee.kind() != "member_expression" {
            return None;
        }
        let object = callee.child_by_field_name("object")?;
        if object.kind() != "identifier" {
            return None;
        }
        match self.text(object) {
            "query" | "mutation" | "subscription" => Some(DefinitionKind::Operation),
            "model" | "fragment" => Some(DefinitionKind::Model),
            "slice" => Some(DefinitionKind::Slice),
            _ => None,
        }
    }

    /// Record embed/spread references inside the builder function body.
    fn collect_dependency_refs(&mut self, node: Node, deps: &mut Vec<DependencyRef>) {
        if node.kind() == "call_expression" {
            if let Some(callee) = node.child_by_field_name("function") {
                if callee.kind() == "member_expression" {
                    let property = callee
                        .child_by_field_name("property")
                        .filter(|p| matches!(self.text(*p), "embed" | "spread"));
                    let object = callee
                        .child_by_field_name("object")
                        .filter(|o| o.kind() == "identifier");
                    if let (Some(_), Some(object)) = (property, object) {
                        let target = self.text(object).to_string();
                        if let Some(id) = self.local_bindings.get(&target) {
                            deps.push(DependencyRef::Local(id.clone()));
                        } else if self.imports.iter().any(|i| i.local == target) {
                            deps.push(DependencyRef::Imported {
                                local_binding: target,
                            });
                        } else {
                            self.diagnostic(
                                object,
                                format!(
                                    "embed target '{target}' does not resolve to an import or a local definition"
                                ),
                            );
                        }
                    }
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_dependency_refs(child, deps);
        }
    }
}

/// Extract the builder call a definition's function returns.
///
/// Supports expression-bodied arrows, and block bodies whose first `return`
/// yields a call.
fn builder_call_of(builder_fn: Node) -> Option<Node> {
    let body = builder_fn.child_by_field_name("body")?;
    match body.kind() {
        "statement_block" => call_of_block(body),
        _ => unwrap_call(body),
    }
}

fn call_of_block(block: Node) -> Option<Node> {
    let mut cursor = block.walk();
    for stmt in block.named_children(&mut cursor) {
        if stmt.kind() == "return_statement" {
            return stmt.named_child(0).and_then(unwrap_call);
        }
    }
    None
}

fn unwrap_call(node: Node) -> Option<Node> {
    match node.kind() {
        "call_expression" => Some(node),
        "parenthesized_expression" => node.named_child(0).and_then(unwrap_call),
        _ => None,
    }
}

/// Strip matching quotes from a string-literal node's text.
fn string_value(text: &str) -> String {
    text.trim_matches('"').trim_matches('\'').to_string()
}

fn first_error_line(root: Node) -> u32 {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return node.start_position().row as u32 + 1;
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return root.start_position().row as u32 + 1;
            }
        }
    }
}
