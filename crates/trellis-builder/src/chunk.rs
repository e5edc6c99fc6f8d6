//! Intermediate module synthesis and the chunk manifest
//!
//! Each source file owning definitions becomes one generated ESM chunk that
//! imports the original file and registers its definitions with a collector
//! runtime. A single entry module imports every chunk dependency-first, so
//! loading it evaluates every definition exactly once; the ES module cache
//! and the collector's canonical-ID guard give the exactly-once property
//! independent of how many times a definition is referenced.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use trellis_core::{BuildError, CanonicalId, ContentHash, DefinitionKind};

use crate::cache;
use crate::graph::DefinitionCatalog;

/// Version stamp of the chunk manifest. Any mismatch discards the manifest.
pub const MANIFEST_VERSION: u32 = 1;

/// Chunk ID of the collector runtime module.
pub const RUNTIME_CHUNK_ID: &str = "__runtime__";

/// Chunk ID of the synthesized entry module.
pub const ENTRY_CHUNK_ID: &str = "__entry__";

/// Tolerance window for the manifest mtime check. Filesystems with coarse
/// timestamp granularity (FAT, some network mounts) round mtimes by up to
/// two seconds, so an exact equality check would force spurious rewrites.
pub const MTIME_TOLERANCE_MS: i64 = 2_000;

const GENERATED_HEADER: &str = "// Generated by trellis. Do not edit.\n";

/// A unit of synthesized, executable source.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file_name: String,
    pub content: String,
    pub content_hash: ContentHash,
}

/// All chunks of one build, entry module last.
#[derive(Debug)]
pub struct ChunkSet {
    pub chunks: Vec<Chunk>,
    pub entry_file: String,
}

impl ChunkSet {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn kind_str(kind: DefinitionKind) -> &'static str {
    match kind {
        DefinitionKind::Operation => "operation",
        DefinitionKind::Model => "model",
        DefinitionKind::Slice => "slice",
    }
}

fn chunk_id_for(source_path: &str) -> String {
    let sanitized: String = source_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let hash = ContentHash::of_str(source_path);
    format!("{}_{}", sanitized, &hash.as_str()[..8])
}

fn make_chunk(id: &str, content: String) -> Chunk {
    Chunk {
        id: id.to_string(),
        file_name: format!("{id}.mjs"),
        content_hash: ContentHash::of_str(&content),
        content,
    }
}

/// Synthesize the chunk set for an acyclic definition catalog.
///
/// `order` is the dependency-first evaluation order produced by the graph.
pub fn synthesize(catalog: &DefinitionCatalog, order: &[CanonicalId]) -> ChunkSet {
    // Source files ordered by the first appearance of one of their
    // definitions in the evaluation order.
    let mut file_order: Vec<&str> = Vec::new();
    for id in order {
        let Some(entry) = catalog.get(id) else { continue };
        if !file_order.contains(&entry.source_path.as_str()) {
            file_order.push(entry.source_path.as_str());
        }
    }

    let mut chunks = Vec::new();
    chunks.push(make_chunk(RUNTIME_CHUNK_ID, runtime_source()));

    let mut chunk_files = Vec::new();
    for source_path in file_order.iter().copied() {
        let id = chunk_id_for(source_path);
        let content = chunk_source(catalog, source_path);
        let chunk = make_chunk(&id, content);
        chunk_files.push(chunk.file_name.clone());
        chunks.push(chunk);
    }

    let entry = make_chunk(ENTRY_CHUNK_ID, entry_source(&chunk_files));
    let entry_file = entry.file_name.clone();
    chunks.push(entry);

    ChunkSet { chunks, entry_file }
}

fn runtime_source() -> String {
    let mut out = String::from(GENERATED_HEADER);
    out.push_str(
        r#"const entries = [];
const seen = new Set();

export function register(canonicalId, kind, schema, value) {
  if (seen.has(canonicalId)) return;
  seen.add(canonicalId);
  entries.push({ canonicalId, kind, schema, value });
}

export function drain() {
  return entries;
}
"#,
    );
    out
}

/// One chunk: import the original module's exported definitions, then
/// register each under its canonical ID.
fn chunk_source(catalog: &DefinitionCatalog, source_path: &str) -> String {
    let mut definitions: Vec<_> = catalog
        .iter()
        .filter(|(_, e)| e.source_path == source_path)
        .map(|(_, e)| &e.definition)
        .collect();
    definitions.sort_by_key(|d| d.line);

    let mut bindings: Vec<&str> = definitions
        .iter()
        .filter_map(|d| d.export_binding.as_deref())
        .collect();
    bindings.dedup();

    let mut out = String::from(GENERATED_HEADER);
    let _ = writeln!(
        out,
        "import {{ register }} from \"./{RUNTIME_CHUNK_ID}.mjs\";"
    );
    // Chunks live at <root>/.trellis/chunks, two levels below the root.
    let _ = writeln!(
        out,
        "import {{ {} }} from \"../../{}\";",
        bindings.join(", "),
        source_path
    );
    out.push('\n');
    for definition in definitions {
        let Some(binding) = definition.export_binding.as_deref() else {
            continue;
        };
        let _ = writeln!(
            out,
            "register({}, {}, {}, {});",
            serde_json::Value::String(definition.id.to_string()),
            serde_json::Value::String(kind_str(definition.kind).to_string()),
            serde_json::Value::String(definition.schema_label.clone()),
            binding
        );
    }
    out
}

fn entry_source(chunk_files: &[String]) -> String {
    let mut out = String::from(GENERATED_HEADER);
    for file in chunk_files {
        let _ = writeln!(out, "import \"./{file}\";");
    }
    let _ = writeln!(out, "import {{ drain }} from \"./{RUNTIME_CHUNK_ID}.mjs\";");
    out.push('\n');
    out.push_str("process.stdout.write(JSON.stringify({ entries: drain() }) + \"\\n\");\n");
    out
}

/// Persisted record of one written chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub content_hash: ContentHash,
    pub output_path: PathBuf,
    pub written_at: String,
}

/// Chunk manifest persisted across builds to support skip-on-unchanged.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkManifest {
    version: u32,
    chunks: BTreeMap<String, ManifestEntry>,
}

impl Default for ChunkManifest {
    fn default() -> Self {
        ChunkManifest {
            version: MANIFEST_VERSION,
            chunks: BTreeMap::new(),
        }
    }
}

impl ChunkManifest {
    /// Load the manifest; any read, parse, or version failure degrades to an
    /// empty manifest, which forces a full rewrite.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<ChunkManifest>(&json) {
                Ok(manifest) if manifest.version == MANIFEST_VERSION => manifest,
                Ok(manifest) => {
                    tracing::debug!(
                        "chunk manifest version {} != {}, discarding",
                        manifest.version,
                        MANIFEST_VERSION
                    );
                    Self::default()
                }
                Err(e) => {
                    tracing::debug!("chunk manifest unreadable, discarding: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::debug!("no chunk manifest at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn entry(&self, chunk_id: &str) -> Option<&ManifestEntry> {
        self.chunks.get(chunk_id)
    }

    pub fn record(&mut self, chunk_id: String, entry: ManifestEntry) {
        self.chunks.insert(chunk_id, entry);
    }

    /// Persist the manifest. Write failures are fatal for the build.
    pub fn save(&self, path: &Path) -> Result<(), BuildError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Result of writing one build's chunk set.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOutcome {
    pub written: u32,
    pub skips: u32,
}

/// A chunk write is skipped only when the manifest entry matches the fresh
/// content hash, the recorded output still exists, and its mtime is within
/// the tolerance window of the recorded timestamp. Anything suspect forces a
/// rewrite; staleness is never an acceptable failure mode.
fn should_skip(entry: Option<&ManifestEntry>, fresh: &ContentHash, output: &Path) -> bool {
    let Some(entry) = entry else { return false };
    if entry.content_hash != *fresh {
        return false;
    }
    if entry.output_path != output {
        return false;
    }
    let Ok(metadata) = std::fs::metadata(&entry.output_path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    let Ok(recorded) = chrono::DateTime::parse_from_rfc3339(&entry.written_at) else {
        return false;
    };
    let modified: chrono::DateTime<chrono::Utc> = modified.into();
    let drift = (modified - recorded.with_timezone(&chrono::Utc))
        .num_milliseconds()
        .abs();
    drift <= MTIME_TOLERANCE_MS
}

/// Write the chunk set under `<root>/.trellis/chunks`.
///
/// The manifest must be loaded before any write; chunk writes run
/// concurrently; the manifest is updated and saved only after every write of
/// this build succeeded. A write failure aborts with no manifest update.
pub async fn write_chunks(
    chunk_set: &ChunkSet,
    root: &Path,
    manifest: &mut ChunkManifest,
) -> Result<WriteOutcome, BuildError> {
    cache::ensure_state_dirs(root)?;
    let dir = cache::chunks_dir(root);

    let mut outcome = WriteOutcome::default();
    let mut pending: Vec<(String, ContentHash, PathBuf)> = Vec::new();
    let mut tasks = Vec::new();

    for chunk in &chunk_set.chunks {
        let output = dir.join(&chunk.file_name);
        if should_skip(manifest.entry(&chunk.id), &chunk.content_hash, &output) {
            tracing::debug!("chunk unchanged, skipping write: {}", chunk.id);
            outcome.skips += 1;
            continue;
        }
        pending.push((chunk.id.clone(), chunk.content_hash.clone(), output.clone()));
        let content = chunk.content.clone();
        tasks.push(tokio::spawn(
            async move { tokio::fs::write(output, content).await },
        ));
    }

    for task in tasks {
        task.await.map_err(std::io::Error::other)??;
    }

    for (chunk_id, content_hash, output_path) in pending {
        tracing::debug!("chunk written: {}", chunk_id);
        manifest.record(
            chunk_id,
            ManifestEntry {
                content_hash,
                output_path,
                written_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        outcome.written += 1;
    }
    manifest.save(&cache::manifest_path(root))?;

    Ok(outcome)
}
