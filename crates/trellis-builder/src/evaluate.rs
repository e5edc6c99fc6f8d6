//! Sandboxed evaluation of the synthesized module, and the registry

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;

use trellis_core::{BuildError, CanonicalId, DefinitionKind};

use crate::graph::DefinitionCatalog;

/// One raw registration emitted by the collector runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRegistration {
    pub canonical_id: String,
    pub kind: String,
    pub schema: String,
    pub value: serde_json::Value,
}

/// Everything the execution host captured from one evaluation pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutput {
    pub entries: Vec<RawRegistration>,
}

/// Injected capability that loads and runs the synthesized entry module in an
/// isolated context and returns the registration stream.
///
/// The core stays host-agnostic: anything that can execute the generated
/// source (a node subprocess, an embedded engine, a test double) qualifies.
#[async_trait::async_trait]
pub trait ExecutionHost: Send + Sync {
    /// Hook for hosts that cannot run the generated source directly and need
    /// to transpile it in place first. The default host runs it as-is.
    async fn prepare(&self, _chunks_dir: &Path) -> Result<(), BuildError> {
        Ok(())
    }

    /// Load and evaluate the entry module.
    async fn evaluate(&self, entry: &Path) -> Result<EvaluationOutput, BuildError>;

    fn name(&self) -> &'static str;
}

/// Default host: shells out to `node` with a scrubbed environment.
///
/// TypeScript sources imported by the chunks are handled by node's built-in
/// type stripping.
pub struct NodeExecutionHost {
    command: String,
    timeout: Option<Duration>,
}

impl NodeExecutionHost {
    pub fn new(command: impl Into<String>, timeout: Option<Duration>) -> Self {
        NodeExecutionHost {
            command: command.into(),
            timeout,
        }
    }

    fn module_path(entry: &Path) -> String {
        entry.display().to_string()
    }
}

#[async_trait::async_trait]
impl ExecutionHost for NodeExecutionHost {
    async fn evaluate(&self, entry: &Path) -> Result<EvaluationOutput, BuildError> {
        let mut command = tokio::process::Command::new(&self.command);
        command
            .arg("--experimental-strip-types")
            .arg("--no-warnings")
            .arg(entry)
            .env_clear()
            .kill_on_drop(true);
        // The subprocess still needs to locate node itself.
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        tracing::debug!("evaluating {} with {}", entry.display(), self.command);
        let run = command.output();
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                BuildError::ModuleEvaluationFailed {
                    module_path: Self::module_path(entry),
                    message: format!("evaluation timed out after {}ms", timeout.as_millis()),
                }
            })?,
            None => run.await,
        }
        .map_err(|e| BuildError::ModuleEvaluationFailed {
            module_path: Self::module_path(entry),
            message: format!("failed to spawn '{}': {}", self.command, e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::ModuleEvaluationFailed {
                module_path: Self::module_path(entry),
                message: stderr.trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| BuildError::ModuleEvaluationFailed {
            module_path: Self::module_path(entry),
            message: format!("collector output was not valid JSON: {e}"),
        })
    }

    fn name(&self) -> &'static str {
        "node"
    }
}

/// A structured issue recorded while folding registrations.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryIssue {
    DuplicateOperationName {
        name: String,
        schema: String,
        first: CanonicalId,
        second: CanonicalId,
    },
    UnknownDefinition {
        id: CanonicalId,
    },
}

impl RegistryIssue {
    pub fn into_error(self) -> BuildError {
        match self {
            RegistryIssue::DuplicateOperationName {
                name,
                schema,
                first,
                second,
            } => BuildError::DuplicateOperationName {
                name,
                schema,
                first,
                second,
            },
            RegistryIssue::UnknownDefinition { id } => BuildError::ArtifactInvalid {
                reason: format!("evaluation registered unknown definition '{id}'"),
            },
        }
    }
}

/// One folded registration, joined against the catalog.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub canonical_id: CanonicalId,
    pub kind: DefinitionKind,
    pub schema_label: String,
    pub operation_name: Option<String>,
    pub payload: serde_json::Value,
}

/// Per-build collector of evaluation results and conflicts.
///
/// Created fresh for exactly one evaluation pass under one configuration key
/// and dropped afterwards; never persisted. Duplicate-name conflicts are
/// scoped per schema label: the same operation name under two different
/// schemas ships to different endpoints and never collides on the wire.
pub struct Registry {
    config_key: String,
    entries: BTreeMap<CanonicalId, RegistryEntry>,
    operation_names: HashMap<(String, String), CanonicalId>,
    issues: Vec<RegistryIssue>,
}

impl Registry {
    pub fn new(config_key: impl Into<String>) -> Self {
        Registry {
            config_key: config_key.into(),
            entries: BTreeMap::new(),
            operation_names: HashMap::new(),
            issues: Vec::new(),
        }
    }

    pub fn config_key(&self) -> &str {
        &self.config_key
    }

    /// Fold one raw registration into the registry.
    ///
    /// Shape errors (an unparsable canonical ID) are returned immediately;
    /// semantic conflicts are recorded as issues and surfaced together once
    /// the whole stream is folded.
    pub fn record(
        &mut self,
        raw: RawRegistration,
        catalog: &DefinitionCatalog,
    ) -> Result<(), BuildError> {
        let id = CanonicalId::parse(&raw.canonical_id)
            .map_err(|e| BuildError::canonical_path(&raw.canonical_id, e))?;

        let Some(entry) = catalog.get(&id) else {
            self.issues.push(RegistryIssue::UnknownDefinition { id });
            return Ok(());
        };
        let kind = entry.definition.kind;

        let operation_name = match kind {
            DefinitionKind::Operation => raw
                .value
                .get("name")
                .and_then(|n| n.as_str())
                .map(|n| n.to_string()),
            _ => None,
        };

        if let Some(name) = &operation_name {
            let key = (raw.schema.clone(), name.clone());
            if let Some(first) = self.operation_names.get(&key) {
                self.issues.push(RegistryIssue::DuplicateOperationName {
                    name: name.clone(),
                    schema: raw.schema.clone(),
                    first: first.clone(),
                    second: id.clone(),
                });
                return Ok(());
            }
            self.operation_names.insert(key, id.clone());
        }

        // The collector runtime already deduplicates by canonical ID, so a
        // repeat here means the generated chunks are wrong.
        if self
            .entries
            .insert(
                id.clone(),
                RegistryEntry {
                    canonical_id: id.clone(),
                    kind,
                    schema_label: raw.schema,
                    operation_name,
                    payload: raw.value,
                },
            )
            .is_some()
        {
            return Err(BuildError::DuplicateCanonicalId { id });
        }
        Ok(())
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Drain recorded issues, most severe first.
    pub fn drain_issues(&mut self) -> Vec<RegistryIssue> {
        std::mem::take(&mut self.issues)
    }

    /// Consume the registry. Errors with the first structured issue when any
    /// conflict was recorded; otherwise yields the folded entries.
    pub fn finish(mut self) -> Result<BTreeMap<CanonicalId, RegistryEntry>, BuildError> {
        let mut issues = self.drain_issues();
        if let Some(first) = issues.drain(..).next() {
            return Err(first.into_error());
        }
        Ok(self.entries)
    }
}

/// Single-flight guard over build-configuration keys.
///
/// Exactly one registry may be active per key; a second build request for an
/// in-flight key is rejected. Builds for different keys are independent.
#[derive(Default)]
pub struct BuildCoordinator {
    active: Arc<DashMap<String, ()>>,
}

impl BuildCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a configuration key for the duration of one build.
    pub fn begin(&self, config_key: &str) -> Result<BuildPermit, BuildError> {
        use dashmap::mapref::entry::Entry;
        match self.active.entry(config_key.to_string()) {
            Entry::Occupied(_) => Err(BuildError::AlreadyBuilding {
                config_key: config_key.to_string(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(BuildPermit {
                    active: Arc::clone(&self.active),
                    config_key: config_key.to_string(),
                })
            }
        }
    }
}

/// Releases the claimed configuration key on drop.
#[derive(Debug)]
pub struct BuildPermit {
    active: Arc<DashMap<String, ()>>,
    config_key: String,
}

impl Drop for BuildPermit {
    fn drop(&mut self) {
        self.active.remove(&self.config_key);
    }
}

/// Absolute path of the entry module for a build root.
pub fn entry_module_path(root: &Path, entry_file: &str) -> PathBuf {
    crate::cache::chunks_dir(root).join(entry_file)
}
