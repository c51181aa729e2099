//! Snapshot manifest: the table of contents written last into every snapshot.
//!
//! Always JSON, whatever codec the entries use, so any version can at least
//! tell what it is looking at.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::codec::SnapshotEntry;
use crate::digest::EntryDigest;

/// File name of the manifest inside a snapshot directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Layout version of the directory snapshot format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size_bytes: u64,
    pub digest: EntryDigest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub format_version: u32,

    /// Name of the codec the entries were written with.
    pub codec: String,

    /// Wall clock time of the save, for operators.
    pub written_at_ms: u64,

    /// Entries in write order.
    pub entries: Vec<ManifestEntry>,
}

impl SnapshotManifest {
    pub fn new(codec: &str, entries: &[SnapshotEntry]) -> Self {
        let written_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            format_version: FORMAT_VERSION,
            codec: codec.to_string(),
            written_at_ms,
            entries: entries
                .iter()
                .map(|entry| ManifestEntry {
                    name: entry.name.clone(),
                    size_bytes: entry.bytes.len() as u64,
                    digest: EntryDigest::of(&entry.bytes),
                })
                .collect(),
        }
    }

    /// Total size of all entries.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_describes_entries() {
        let entries = vec![
            SnapshotEntry::new("rest.state", b"{}".to_vec()),
            SnapshotEntry::new("nodes.0.state", b"[1,2,3]".to_vec()),
        ];
        let manifest = SnapshotManifest::new("json", &entries);

        assert_eq!(manifest.format_version, FORMAT_VERSION);
        assert_eq!(manifest.codec, "json");
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[1].name, "nodes.0.state");
        assert_eq!(manifest.entries[1].size_bytes, 7);
        assert!(manifest.entries[1].digest.matches(b"[1,2,3]"));
        assert_eq!(manifest.total_bytes(), 9);
        assert!(manifest.written_at_ms > 0);
    }

    #[test]
    fn test_manifest_bytes_round_trip() {
        let entries = vec![SnapshotEntry::new("rest.state", b"{}".to_vec())];
        let manifest = SnapshotManifest::new("json", &entries);

        let restored = SnapshotManifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, manifest);
    }

    #[test]
    fn test_legacy_bytes_are_not_a_manifest() {
        assert!(SnapshotManifest::from_bytes(b"legacy location for cache").is_err());
    }
}
