//! Dependency graph construction and cycle detection

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use trellis_core::{BuildError, CanonicalId, ContentHash, Definition, DependencyRef, ModuleAnalysis};

/// Extensions probed when resolving an extensionless relative import.
const RESOLVE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// One definition joined with its file's static metadata.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub definition: Definition,
    pub source_path: String,
    pub source_content_hash: ContentHash,
}

/// Every discovered definition of the current build, keyed by canonical ID.
#[derive(Debug, Default)]
pub struct DefinitionCatalog {
    entries: BTreeMap<CanonicalId, CatalogEntry>,
}

impl DefinitionCatalog {
    /// Collect all definitions across all analyses.
    ///
    /// Two analyses producing the same canonical ID would corrupt every
    /// downstream keyed structure, so it is rejected as an internal error.
    pub fn build(analyses: &[ModuleAnalysis]) -> Result<Self, BuildError> {
        let mut entries = BTreeMap::new();
        for analysis in analyses {
            for definition in &analysis.definitions {
                let entry = CatalogEntry {
                    definition: definition.clone(),
                    source_path: analysis.source_path.clone(),
                    source_content_hash: analysis.content_hash.clone(),
                };
                if entries.insert(definition.id.clone(), entry).is_some() {
                    return Err(BuildError::DuplicateCanonicalId {
                        id: definition.id.clone(),
                    });
                }
            }
        }
        Ok(DefinitionCatalog { entries })
    }

    pub fn get(&self, id: &CanonicalId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalId, &CatalogEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The dependency graph over canonical IDs.
///
/// Nodes are indexed through an id → index arena so edges never hold owning
/// references; rebuilt from scratch every build and never persisted.
pub struct DependencyGraph {
    inner: StableDiGraph<CanonicalId, ()>,
    indices: HashMap<CanonicalId, NodeIndex>,
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl DependencyGraph {
    /// Build the graph from every definition's dependency list, resolving
    /// imported references through module export tables.
    ///
    /// Unresolvable references degrade to warnings, never edges; after
    /// resolution every edge target must exist in the node set.
    pub fn build(
        analyses: &[ModuleAnalysis],
        catalog: &DefinitionCatalog,
        warnings: &mut Vec<String>,
    ) -> Result<Self, BuildError> {
        let by_path: HashMap<&str, &ModuleAnalysis> = analyses
            .iter()
            .map(|a| (a.source_path.as_str(), a))
            .collect();

        let mut inner = StableDiGraph::new();
        let mut indices = HashMap::new();
        for (id, _) in catalog.iter() {
            let index = inner.add_node(id.clone());
            indices.insert(id.clone(), index);
        }

        let mut graph = DependencyGraph { inner, indices };

        for (id, entry) in catalog.iter() {
            for dependency in &entry.definition.dependencies {
                let target = match dependency {
                    DependencyRef::Local(target) => Some(target.clone()),
                    DependencyRef::Imported { local_binding } => resolve_import(
                        entry,
                        local_binding,
                        &by_path,
                        warnings,
                    ),
                };
                let Some(target) = target else {
                    continue;
                };
                graph.add_edge(id, &target)?;
            }
        }

        tracing::debug!(
            "dependency graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    fn add_edge(&mut self, from: &CanonicalId, to: &CanonicalId) -> Result<(), BuildError> {
        let (Some(&source), Some(&target)) = (self.indices.get(from), self.indices.get(to)) else {
            return Err(BuildError::DanglingReference {
                from: from.clone(),
                to: to.clone(),
            });
        };
        self.inner.add_edge(source, target, ());
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Check whether a direct dependency edge exists.
    pub fn has_edge(&self, from: &CanonicalId, to: &CanonicalId) -> bool {
        match (self.indices.get(from), self.indices.get(to)) {
            (Some(&source), Some(&target)) => self.inner.contains_edge(source, target),
            _ => false,
        }
    }

    /// Find a dependency cycle, if any.
    ///
    /// Depth-first with an explicit stack rather than call-stack recursion,
    /// so arbitrarily deep user graphs cannot overflow. Returns the ordered
    /// chain from the first visit of the repeated node through the repeat,
    /// inclusive.
    pub fn find_cycle(&self) -> Option<Vec<CanonicalId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Active,
            Done,
        }

        let mut states: HashMap<NodeIndex, State> = HashMap::new();

        let mut roots: Vec<NodeIndex> = self.inner.node_indices().collect();
        roots.sort_by(|a, b| self.inner[*a].cmp(&self.inner[*b]));

        for root in roots {
            if states.contains_key(&root) {
                continue;
            }

            // (node, sorted successor list, next successor to try)
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
                vec![(root, self.sorted_successors(root), 0)];
            states.insert(root, State::Active);

            while !stack.is_empty() {
                let (node, next) = {
                    let Some(frame) = stack.last_mut() else { break };
                    if frame.2 >= frame.1.len() {
                        (frame.0, None)
                    } else {
                        let next = frame.1[frame.2];
                        frame.2 += 1;
                        (frame.0, Some(next))
                    }
                };

                let Some(next) = next else {
                    states.insert(node, State::Done);
                    stack.pop();
                    continue;
                };

                match states.get(&next) {
                    None => {
                        states.insert(next, State::Active);
                        let successors = self.sorted_successors(next);
                        stack.push((next, successors, 0));
                    }
                    Some(State::Active) => {
                        // Back-edge: the chain runs from the first visit of
                        // `next` down to the current node, then repeats it.
                        let start = stack
                            .iter()
                            .position(|(n, _, _)| *n == next)
                            .unwrap_or(0);
                        let mut chain: Vec<CanonicalId> = stack[start..]
                            .iter()
                            .map(|(n, _, _)| self.inner[*n].clone())
                            .collect();
                        chain.push(self.inner[next].clone());
                        return Some(chain);
                    }
                    Some(State::Done) => {}
                }
            }
        }
        None
    }

    /// Dependency-first evaluation order over the acyclic graph.
    pub fn evaluation_order(&self) -> Result<Vec<CanonicalId>, BuildError> {
        if let Some(chain) = self.find_cycle() {
            return Err(BuildError::CircularDependency { chain });
        }
        let order = petgraph::algo::toposort(&self.inner, None).map_err(|_| {
            // Unreachable after the cycle check above.
            BuildError::CircularDependency { chain: Vec::new() }
        })?;
        Ok(order
            .into_iter()
            .rev()
            .map(|index| self.inner[index].clone())
            .collect())
    }

    fn sorted_successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut successors: Vec<NodeIndex> = self
            .inner
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        successors.sort_by(|a, b| self.inner[*a].cmp(&self.inner[*b]));
        successors
    }
}

/// Resolve an imported dependency reference to its target definition.
fn resolve_import(
    entry: &CatalogEntry,
    local_binding: &str,
    by_path: &HashMap<&str, &ModuleAnalysis>,
    warnings: &mut Vec<String>,
) -> Option<CanonicalId> {
    let analysis = by_path.get(entry.source_path.as_str())?;
    let Some(record) = analysis.import_for_binding(local_binding) else {
        warnings.push(format!(
            "{}: embed target '{}' has no import record",
            entry.source_path, local_binding
        ));
        return None;
    };

    if !record.source.starts_with('.') {
        tracing::debug!(
            "{}: import of '{}' from '{}' is external, no edge",
            entry.source_path,
            record.imported,
            record.source
        );
        return None;
    }

    let Some(target_path) = resolve_specifier(&entry.source_path, &record.source, by_path) else {
        warnings.push(format!(
            "{}: import '{}' does not resolve to an analyzed module",
            entry.source_path, record.source
        ));
        return None;
    };

    let target_analysis = by_path.get(target_path.as_str())?;
    match target_analysis.definition_for_export(&record.imported) {
        Some(definition) => Some(definition.id.clone()),
        None => {
            warnings.push(format!(
                "{}: imported binding '{}' from '{}' does not name a definition export",
                entry.source_path, record.imported, record.source
            ));
            None
        }
    }
}

/// Resolve a relative specifier against the analyzed module set.
fn resolve_specifier(
    importer: &str,
    specifier: &str,
    by_path: &HashMap<&str, &ModuleAnalysis>,
) -> Option<String> {
    let base = match importer.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{specifier}"),
        None => specifier.to_string(),
    };
    let joined = normalize_path(&base);

    let mut candidates = vec![joined.clone()];
    for ext in RESOLVE_EXTENSIONS {
        candidates.push(format!("{joined}.{ext}"));
    }
    for ext in RESOLVE_EXTENSIONS {
        candidates.push(format!("{joined}/index.{ext}"));
    }

    candidates
        .into_iter()
        .find(|candidate| by_path.contains_key(candidate.as_str()))
}

/// Normalize `.` and `..` components of a forward-slash path.
fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }
    components.join("/")
}
