//! Canonical definition identity codec

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the file-path and scope-path segments.
pub const SEPARATOR: &str = "::";

/// Stable `(file path, scope path)` identity for one discovered definition.
///
/// The canonical ID is the only identity used across the pipeline: it keys the
/// dependency graph, the analysis cache, and the final artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Encode a file path and scope path into a canonical ID.
    ///
    /// Path separators are normalized to forward slashes so artifact keys
    /// match across platforms.
    pub fn encode(file_path: &str, scope_path: &str) -> Self {
        let normalized = file_path.replace('\\', "/");
        CanonicalId(format!("{normalized}{SEPARATOR}{scope_path}"))
    }

    /// Decode back into `(file_path, scope_path)`.
    pub fn decode(&self) -> Result<(&str, &str), CanonicalPathError> {
        Self::split(&self.0)
    }

    /// Validate and split a raw string without taking ownership.
    pub fn split(value: &str) -> Result<(&str, &str), CanonicalPathError> {
        let Some((file_path, scope_path)) = value.split_once(SEPARATOR) else {
            return Err(CanonicalPathError::MissingSeparator);
        };
        if file_path.is_empty() {
            return Err(CanonicalPathError::EmptyFilePath);
        }
        if scope_path.is_empty() {
            return Err(CanonicalPathError::EmptyScopePath);
        }
        Ok((file_path, scope_path))
    }

    /// Parse a raw string into a validated canonical ID.
    pub fn parse(value: &str) -> Result<Self, CanonicalPathError> {
        Self::split(value)?;
        Ok(CanonicalId(value.to_string()))
    }

    /// The file-path segment.
    pub fn file_path(&self) -> &str {
        self.0.split_once(SEPARATOR).map(|(f, _)| f).unwrap_or("")
    }

    /// The scope-path segment.
    pub fn scope_path(&self) -> &str {
        self.0.split_once(SEPARATOR).map(|(_, s)| s).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a canonical path string failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalPathError {
    MissingSeparator,
    EmptyFilePath,
    EmptyScopePath,
}

impl CanonicalPathError {
    /// Stable reason string, suitable for matching in diagnostics.
    pub fn reason(&self) -> &'static str {
        match self {
            CanonicalPathError::MissingSeparator => "missing '::' separator",
            CanonicalPathError::EmptyFilePath => "empty file path segment",
            CanonicalPathError::EmptyScopePath => "empty scope path segment",
        }
    }
}

impl fmt::Display for CanonicalPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

impl std::error::Error for CanonicalPathError {}
