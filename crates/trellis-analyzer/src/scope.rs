//! Scope-path tracking during the syntax walk

use std::collections::{HashMap, HashSet};

use trellis_core::{CanonicalId, Definition};

/// What kind of syntax construct opened a scope frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Function,
    Class,
    Variable,
    Property,
    Method,
    Expression,
}

/// One frame on the scope stack, carrying its name segment.
#[derive(Debug, Clone)]
pub struct ScopeFrame {
    pub kind: ScopeKind,
    pub segment: String,
}

/// Tracks the enclosing-scope path of the current walk position.
///
/// The scope path of a point in the tree is the frames' segments joined by
/// `.`. Anonymous scopes are named `<label>#N` with a file-wide per-label
/// counter; definitions registered at an already-used path get a `$N`
/// occurrence suffix.
#[derive(Debug, Default)]
pub struct ScopeTracker {
    stack: Vec<ScopeFrame>,
    anonymous_counters: HashMap<&'static str, usize>,
    occurrence_counters: HashMap<String, usize>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, kind: ScopeKind, segment: String) {
        self.stack.push(ScopeFrame { kind, segment });
    }

    pub fn exit(&mut self) {
        self.stack.pop();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn top(&self) -> Option<&ScopeFrame> {
        self.stack.last()
    }

    /// Next `<label>#N` segment for an anonymous scope.
    pub fn anonymous_segment(&mut self, label: &'static str) -> String {
        let count = self.anonymous_counters.entry(label).or_insert(0);
        let segment = format!("{label}#{count}");
        *count += 1;
        segment
    }

    /// Current scope path, segments joined by `.`.
    pub fn current_path(&self) -> String {
        self.stack
            .iter()
            .map(|f| f.segment.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Register a definition at the current path, disambiguating repeat
    /// occurrences of the same path with a `$N` suffix.
    pub fn register_occurrence(&mut self) -> String {
        let base = self.current_path();
        let count = self.occurrence_counters.entry(base.clone()).or_insert(0);
        let path = if *count == 0 {
            base.clone()
        } else {
            format!("{base}${count}")
        };
        *count += 1;
        path
    }
}

/// Second uniqueness pass over a file's definitions.
///
/// The occurrence counter already disambiguates repeats, but a suffixed path
/// can itself collide with a literal source name (`a$1` as a variable). Any
/// residual collision gets an incrementing counter until the path is free.
pub fn ensure_unique_scope_paths(source_path: &str, definitions: &mut [Definition]) {
    let mut seen: HashSet<String> = HashSet::new();
    for definition in definitions.iter_mut() {
        let scope = definition.id.scope_path().to_string();
        if seen.insert(scope.clone()) {
            continue;
        }
        let mut counter = 1;
        let unique = loop {
            let candidate = format!("{scope}${counter}");
            if !seen.contains(&candidate) {
                break candidate;
            }
            counter += 1;
        };
        seen.insert(unique.clone());
        definition.id = CanonicalId::encode(source_path, &unique);
    }
}
