//! Snapshot reader: find the current snapshot, verify it, decode it.
//!
//! The canonical directory is authoritative. If it is missing but a backup
//! exists, a save was interrupted between moving the old snapshot aside and
//! installing the new one, and the backup is the newest complete snapshot.

use std::io;
use std::path::{Path, PathBuf};

use crate::codec::{decode_state, Codec, SnapshotEntry};
use crate::config::CacheConfig;
use crate::error::PersistError;
use crate::fs::Filesystem;
use crate::manifest::{SnapshotManifest, FORMAT_VERSION, MANIFEST_FILE};
use crate::state::StoreState;

/// How many times a read locates the snapshot before giving up on one that
/// keeps changing underneath it.
pub const READ_ATTEMPTS: usize = 3;

pub struct SnapshotReader<'a> {
    fs: &'a dyn Filesystem,
    config: &'a CacheConfig,
    codec: &'a dyn Codec,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(fs: &'a dyn Filesystem, config: &'a CacheConfig, codec: &'a dyn Codec) -> Self {
        Self { fs, config, codec }
    }

    async fn is_present(&self, path: &Path) -> Result<bool, PersistError> {
        self.fs
            .exists(path)
            .await
            .map_err(|e| PersistError::read(path, e))
    }

    /// Directory holding the newest complete snapshot, if any.
    pub async fn locate(&self) -> Result<Option<PathBuf>, PersistError> {
        let canonical = self.config.snapshot_dir();
        if self.is_present(&canonical).await? {
            return Ok(Some(canonical));
        }

        let backup = self.config.backup_dir();
        if self.is_present(&backup).await? {
            tracing::warn!(
                backup = %backup.display(),
                "snapshot missing after an interrupted save, reading previous snapshot"
            );
            return Ok(Some(backup));
        }

        // A save may have installed its snapshot and dropped the backup
        // between the two checks above.
        if self.is_present(&canonical).await? {
            return Ok(Some(canonical));
        }
        Ok(None)
    }

    /// Load and decode the current snapshot. `Ok(None)` is a cold start.
    ///
    /// A snapshot that moves or changes while it is being read is located
    /// again, up to [`READ_ATTEMPTS`] times.
    pub async fn load(&self) -> Result<Option<StoreState>, PersistError> {
        let mut attempt = 1;
        loop {
            let Some(dir) = self.locate().await? else {
                return Ok(None);
            };

            let (result, manifest) = match self.read_manifest(&dir).await {
                Ok(manifest) => (self.load_from(&dir, &manifest).await, Some(manifest)),
                Err(e) => (Err(e), None),
            };

            match result {
                Ok(state) => return Ok(Some(state)),
                Err(e)
                    if e.is_corrupt()
                        && attempt < READ_ATTEMPTS
                        && self.replaced(&dir, manifest.as_ref()).await =>
                {
                    tracing::debug!(
                        dir = %dir.display(),
                        attempt,
                        error = %e,
                        "snapshot replaced during read, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether the snapshot in `dir` is no longer the one described by `seen`.
    async fn replaced(&self, dir: &Path, seen: Option<&SnapshotManifest>) -> bool {
        match self.fs.exists(dir).await {
            Ok(false) => return true,
            Ok(true) => {}
            Err(_) => return false,
        }
        match (seen, self.read_manifest(dir).await) {
            (Some(seen), Ok(current)) => &current != seen,
            (None, Ok(_)) => true,
            (_, Err(_)) => false,
        }
    }

    /// Read and validate the manifest of the snapshot in `dir`.
    pub async fn read_manifest(&self, dir: &Path) -> Result<SnapshotManifest, PersistError> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = match self.fs.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PersistError::corrupt(&path, "snapshot has no manifest"));
            }
            Err(e) => return Err(PersistError::read(&path, e)),
        };

        let manifest = SnapshotManifest::from_bytes(&bytes)
            .map_err(|e| PersistError::corrupt(&path, format!("unreadable manifest: {e}")))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(PersistError::corrupt(
                &path,
                format!(
                    "format version {} is not supported (expected {})",
                    manifest.format_version, FORMAT_VERSION
                ),
            ));
        }
        if manifest.codec != self.codec.name() {
            return Err(PersistError::corrupt(
                &path,
                format!(
                    "written with codec {}, reading with {}",
                    manifest.codec,
                    self.codec.name()
                ),
            ));
        }
        Ok(manifest)
    }

    async fn load_from(
        &self,
        dir: &Path,
        manifest: &SnapshotManifest,
    ) -> Result<StoreState, PersistError> {
        let mut entries = Vec::with_capacity(manifest.entries.len());
        for expected in &manifest.entries {
            let path = dir.join(&expected.name);
            let bytes = match self.fs.read_file(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(PersistError::corrupt(
                        &path,
                        "entry listed in manifest is missing",
                    ));
                }
                Err(e) => return Err(PersistError::read(&path, e)),
            };

            if bytes.len() as u64 != expected.size_bytes || !expected.digest.matches(&bytes) {
                return Err(PersistError::corrupt(
                    &path,
                    format!(
                        "entry does not match manifest ({} bytes, expected {})",
                        bytes.len(),
                        expected.size_bytes
                    ),
                ));
            }
            entries.push(SnapshotEntry::new(expected.name.clone(), bytes));
        }

        decode_state(dir, &entries, self.codec)
    }
}
