//! Save/restore orchestration.
//!
//! [`SnapshotStore`] owns the on-disk location and sequences the pieces:
//!
//! ```text
//! save:    encode -> stage -> displace previous -> install -> discard backup -> legacy cleanup
//! restore: legacy check -> locate -> verify -> decode
//! ```
//!
//! At most one save per cache root should be in flight within a process;
//! callers serialize saves. Across processes the install rename is the only
//! coordination, and the last rename wins.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::Instrument;

use crate::codec::{encode_state, Codec, JsonCodec};
use crate::config::{CacheConfig, CorruptPolicy, STAGING_PREFIX};
use crate::error::PersistError;
use crate::fs::{Filesystem, LocalFs};
use crate::legacy::{cleanup_legacy, detect_legacy, LegacyCleanup};
use crate::manifest::SnapshotManifest;
use crate::reader::SnapshotReader;
use crate::state::{Action, Store, StoreState};
use crate::writer::{discard_backup, displace_previous, restore_previous, SnapshotWriter};

/// What a successful save wrote.
#[derive(Debug)]
pub struct SaveReport {
    pub snapshot_dir: PathBuf,
    /// Entries written, manifest excluded.
    pub entries: usize,
    /// Bytes written, manifest excluded.
    pub bytes: u64,
    pub legacy: LegacyCleanup,
}

#[derive(Debug)]
pub enum SaveOutcome {
    Saved(SaveReport),
    /// Persistence is turned off in the config; nothing was written.
    Disabled,
}

impl SaveOutcome {
    pub fn report(&self) -> Option<&SaveReport> {
        match self {
            Self::Saved(report) => Some(report),
            Self::Disabled => None,
        }
    }
}

#[derive(Debug)]
pub enum SnapshotPresence {
    Absent,
    Present(SnapshotManifest),
    /// Something is at the snapshot location but its manifest cannot be used.
    Unreadable(String),
}

/// On-disk state of a cache root.
#[derive(Debug)]
pub struct CacheStatus {
    pub snapshot: SnapshotPresence,
    pub backup_present: bool,
    pub legacy_present: bool,
    /// Names of staging directories left behind by interrupted saves.
    pub staging_dirs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
}

/// Durable snapshots of a [`Store`] under one cache root.
pub struct SnapshotStore {
    config: CacheConfig,
    fs: Arc<dyn Filesystem>,
    codec: Arc<dyn Codec>,
}

impl SnapshotStore {
    /// Snapshots on the local filesystem, encoded as JSON.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_filesystem(config, Arc::new(LocalFs::new()))
    }

    pub fn with_filesystem(config: CacheConfig, fs: Arc<dyn Filesystem>) -> Self {
        Self {
            config,
            fs,
            codec: Arc::new(JsonCodec),
        }
    }

    /// Builder: use a different codec for snapshot entries.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Write the whole state of `store` as the new current snapshot.
    ///
    /// Returns once the snapshot is installed. On error the previous snapshot
    /// is still the one a reader finds.
    pub async fn save_state(&self, store: &Store) -> Result<SaveOutcome, PersistError> {
        let span = tracing::info_span!(
            "statecache.save",
            cache_root = %self.config.cache_root.display(),
            error.type = tracing::field::Empty,
        );

        async {
            let result = self.save_inner(store.state()).await;
            if let Err(ref e) = result {
                tracing::Span::current().record("error.type", error_type(e));
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn save_inner(&self, state: &StoreState) -> Result<SaveOutcome, PersistError> {
        if self.config.disable_persistence {
            tracing::info!("persistence disabled, not saving state");
            return Ok(SaveOutcome::Disabled);
        }

        let fs = self.fs.as_ref();
        let entries = encode_state(state, self.codec.as_ref(), self.config.max_chunk_bytes)?;
        let entry_count = entries.len();
        let bytes: u64 = entries.iter().map(|e| e.bytes.len() as u64).sum();

        let writer = SnapshotWriter::new(fs, &self.config);
        let area = writer.stage(&entries, self.codec.name()).await?;

        let backup = match displace_previous(fs, &self.config).await {
            Ok(backup) => backup,
            Err(e) => {
                writer.abandon(&area).await;
                return Err(e);
            }
        };

        let snapshot_dir = match writer.install(area).await {
            Ok(dir) => dir,
            Err(e) => {
                if let Some(backup) = &backup {
                    if let Err(restore_err) = restore_previous(fs, &self.config, backup).await {
                        tracing::warn!(
                            backup = %backup.display(),
                            error = %restore_err,
                            "failed to put previous snapshot back; readers will use the backup"
                        );
                    }
                }
                return Err(e);
            }
        };

        // Also covers a backup left by a save that died before install
        let backup_dir = self.config.backup_dir();
        if backup.is_some() || matches!(fs.exists(&backup_dir).await, Ok(true)) {
            discard_backup(fs, &backup_dir).await;
        }

        let legacy = cleanup_legacy(fs, &self.config.legacy_file()).await;

        tracing::info!(
            snapshot = %snapshot_dir.display(),
            entries = entry_count,
            bytes,
            nodes = state.nodes.len(),
            pages = state.pages.len(),
            "saved state snapshot"
        );

        Ok(SaveOutcome::Saved(SaveReport {
            snapshot_dir,
            entries: entry_count,
            bytes,
            legacy,
        }))
    }

    /// Load the current snapshot.
    ///
    /// A cold start returns the empty state. A corrupt snapshot is handled per
    /// [`CacheConfig::on_corrupt`].
    pub async fn read_state(&self) -> Result<StoreState, PersistError> {
        let span = tracing::info_span!(
            "statecache.restore",
            cache_root = %self.config.cache_root.display(),
            error.type = tracing::field::Empty,
        );

        async {
            let result = self.read_inner().await;
            if let Err(ref e) = result {
                tracing::Span::current().record("error.type", error_type(e));
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn read_inner(&self) -> Result<StoreState, PersistError> {
        let legacy = self.config.legacy_file();
        if detect_legacy(self.fs.as_ref(), &legacy).await {
            tracing::warn!(
                path = %legacy.display(),
                "ignoring legacy state file; it will be removed on the next save"
            );
        }

        let reader = SnapshotReader::new(self.fs.as_ref(), &self.config, self.codec.as_ref());
        match reader.load().await {
            Ok(Some(state)) => {
                tracing::info!(
                    nodes = state.nodes.len(),
                    pages = state.pages.len(),
                    components = state.components.len(),
                    "restored state snapshot"
                );
                Ok(state)
            }
            Ok(None) => {
                tracing::debug!("no snapshot, starting from empty state");
                Ok(StoreState::default())
            }
            Err(e) if e.is_corrupt() && self.config.on_corrupt == CorruptPolicy::Discard => {
                tracing::warn!(
                    error = %e,
                    "discarding corrupt snapshot, starting from empty state"
                );
                Ok(StoreState::default())
            }
            Err(e) => Err(e),
        }
    }

    /// [`read_state`](Self::read_state) into a fresh [`Store`].
    pub async fn restore_store(&self) -> Result<Store, PersistError> {
        Ok(Store::with_state(self.read_state().await?))
    }

    /// Reset `store` to its empty shape. The snapshot on disk stays until the
    /// next save or [`purge`](Self::purge).
    pub fn clear_cache(&self, store: &mut Store) {
        store.dispatch(Action::DeleteCache);
    }

    /// Describe what is on disk under the cache root.
    pub async fn status(&self) -> Result<CacheStatus, PersistError> {
        let fs = self.fs.as_ref();
        let snapshot_dir = self.config.snapshot_dir();

        let snapshot = if self.path_exists(&snapshot_dir).await? {
            let reader = SnapshotReader::new(fs, &self.config, self.codec.as_ref());
            match reader.read_manifest(&snapshot_dir).await {
                Ok(manifest) => SnapshotPresence::Present(manifest),
                Err(e) => SnapshotPresence::Unreadable(e.to_string()),
            }
        } else {
            SnapshotPresence::Absent
        };

        Ok(CacheStatus {
            snapshot,
            backup_present: self.path_exists(&self.config.backup_dir()).await?,
            legacy_present: self.path_exists(&self.config.legacy_file()).await?,
            staging_dirs: self.staging_dirs().await?,
        })
    }

    /// Delete every piece of cache state under the cache root: the snapshot,
    /// its backup, the legacy file and leftover staging directories.
    ///
    /// Must not run while a save is in flight.
    pub async fn purge(&self) -> Result<PurgeReport, PersistError> {
        let fs = self.fs.as_ref();
        let mut report = PurgeReport::default();

        for dir in [self.config.snapshot_dir(), self.config.backup_dir()] {
            if self.path_exists(&dir).await? {
                fs.remove_dir_all(&dir)
                    .await
                    .map_err(|e| PersistError::write(&dir, e))?;
                report.removed.push(dir);
            }
        }

        let legacy = self.config.legacy_file();
        if self.path_exists(&legacy).await? {
            fs.remove_file(&legacy)
                .await
                .map_err(|e| PersistError::write(&legacy, e))?;
            report.removed.push(legacy);
        }

        for name in self.staging_dirs().await? {
            let dir = self.config.cache_root.join(name);
            fs.remove_dir_all(&dir)
                .await
                .map_err(|e| PersistError::write(&dir, e))?;
            report.removed.push(dir);
        }

        tracing::info!(
            cache_root = %self.config.cache_root.display(),
            removed = report.removed.len(),
            "purged cache"
        );
        Ok(report)
    }

    async fn path_exists(&self, path: &std::path::Path) -> Result<bool, PersistError> {
        self.fs
            .exists(path)
            .await
            .map_err(|e| PersistError::read(path, e))
    }

    async fn staging_dirs(&self) -> Result<Vec<String>, PersistError> {
        let root = &self.config.cache_root;
        match self.fs.read_dir(root).await {
            Ok(names) => Ok(names
                .into_iter()
                .filter(|name| name.starts_with(STAGING_PREFIX))
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(PersistError::read(root, e)),
        }
    }
}

fn error_type(error: &PersistError) -> &'static str {
    match error {
        PersistError::Write { .. } => "write",
        PersistError::TargetExists { .. } => "target_exists",
        PersistError::Read { .. } => "read",
        PersistError::Corrupt { .. } => "corrupt",
        PersistError::Encode { .. } => "encode",
    }
}
