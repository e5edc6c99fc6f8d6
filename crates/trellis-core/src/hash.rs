//! Content hashing for cache keys and artifact metadata

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of some content.
///
/// Used for file contents, generated chunk sources, and evaluated payloads.
/// Hashes must be deterministic for identical content across builds and
/// platforms; the persisted caches depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        ContentHash(format!("{:x}", hasher.finalize()))
    }

    pub fn of_str(content: &str) -> Self {
        Self::of_bytes(content.as_bytes())
    }

    /// Hash a JSON value through its compact serialization.
    pub fn of_json(value: &serde_json::Value) -> Self {
        Self::of_str(&value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
