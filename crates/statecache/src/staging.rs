//! Staging: the private directory a snapshot is assembled in before publish.
//!
//! A staging area lives next to the canonical snapshot directory (same volume,
//! so the final rename stays atomic) and has a random name:
//! ```text
//! {cache_root}/
//! ├── redux-state/              # canonical snapshot
//! ├── .redux-state-3f9a0c.../   # staging area of an in-flight save
//! └── redux.state               # legacy flat file (purged)
//! ```
//!
//! Nothing but the owning writer ever looks inside a staging area. It either
//! becomes the canonical directory by rename or is abandoned.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A random staging ID, 32 hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingId(String);

impl StagingId {
    /// Generate a new random staging ID.
    pub fn new() -> Self {
        let uuid = Uuid::new_v4();
        let hash_bytes = blake3::hash(uuid.as_bytes());
        Self(hex::encode(&hash_bytes.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StagingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StagingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a staging directory for the given prefix.
pub fn staging_dir_name(prefix: &str, id: &StagingId) -> String {
    format!("{}{}", prefix, id)
}

/// A staging directory owned by one in-flight save.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    entries: Vec<String>,
    bytes_written: u64,
}

impl StagingArea {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
            bytes_written: 0,
        }
    }

    /// Path of the staging directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path an entry would have inside this staging area.
    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Names of the entries written so far, in write order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub(crate) fn record(&mut self, name: &str, len: usize) {
        self.entries.push(name.to_string());
        self.bytes_written += len as u64;
    }
}
