//! Snapshot writer: stage every entry privately, then publish with one rename.
//!
//! Nothing here touches the canonical snapshot directory until
//! [`SnapshotWriter::install`], and install is a single no-replace rename.
//! A failure anywhere before it leaves the previous snapshot as it was.
//!
//! Making room for the new snapshot is a separate step,
//! [`displace_previous`], which the orchestrator runs between staging and
//! install.

use std::io;
use std::path::{Path, PathBuf};

use crate::codec::SnapshotEntry;
use crate::config::{CacheConfig, STAGING_PREFIX};
use crate::error::PersistError;
use crate::fs::Filesystem;
use crate::manifest::{SnapshotManifest, MANIFEST_FILE};
use crate::staging::StagingArea;

pub struct SnapshotWriter<'a> {
    fs: &'a dyn Filesystem,
    config: &'a CacheConfig,
}

impl<'a> SnapshotWriter<'a> {
    pub fn new(fs: &'a dyn Filesystem, config: &'a CacheConfig) -> Self {
        Self { fs, config }
    }

    /// Write `entries` and their manifest into a fresh staging area.
    ///
    /// On failure the staging area is abandoned and the error returned.
    pub async fn stage(
        &self,
        entries: &[SnapshotEntry],
        codec_name: &str,
    ) -> Result<StagingArea, PersistError> {
        let root = &self.config.cache_root;
        self.fs
            .create_dir_all(root)
            .await
            .map_err(|e| PersistError::write(root, e))?;

        let path = self
            .fs
            .make_temp_dir(root, STAGING_PREFIX)
            .await
            .map_err(|e| PersistError::write(root, e))?;
        let mut area = StagingArea::new(path);

        if let Err(e) = self.fill(&mut area, entries, codec_name).await {
            self.abandon(&area).await;
            return Err(e);
        }

        tracing::debug!(
            staging = %area.path().display(),
            entries = area.entries().len(),
            bytes = area.bytes_written(),
            "staged snapshot"
        );
        Ok(area)
    }

    async fn fill(
        &self,
        area: &mut StagingArea,
        entries: &[SnapshotEntry],
        codec_name: &str,
    ) -> Result<(), PersistError> {
        for entry in entries {
            let path = area.entry_path(&entry.name);
            self.fs
                .write_file(&path, &entry.bytes)
                .await
                .map_err(|e| PersistError::write(&path, e))?;
            area.record(&entry.name, entry.bytes.len());
        }

        // Last, so a staging area with a manifest is a complete one.
        let manifest = SnapshotManifest::new(codec_name, entries);
        let path = area.entry_path(MANIFEST_FILE);
        let bytes = manifest
            .to_bytes()
            .map_err(|e| PersistError::write(&path, io::Error::other(e)))?;
        self.fs
            .write_file(&path, &bytes)
            .await
            .map_err(|e| PersistError::write(&path, e))?;
        area.record(MANIFEST_FILE, bytes.len());
        Ok(())
    }

    /// Rename the staging area into the canonical location.
    ///
    /// Fails with [`PersistError::TargetExists`] if the canonical location is
    /// already taken; nothing is overwritten. The staging area is abandoned on
    /// any failure.
    pub async fn install(&self, area: StagingArea) -> Result<PathBuf, PersistError> {
        let target = self.config.snapshot_dir();
        match self.fs.rename(area.path(), &target).await {
            Ok(()) => Ok(target),
            Err(e) => {
                self.abandon(&area).await;
                if e.kind() == io::ErrorKind::AlreadyExists {
                    Err(PersistError::TargetExists { path: target })
                } else {
                    Err(PersistError::write(&target, e))
                }
            }
        }
    }

    /// Stage and install in one go. The canonical location must be free.
    pub async fn publish(
        &self,
        entries: &[SnapshotEntry],
        codec_name: &str,
    ) -> Result<PathBuf, PersistError> {
        let area = self.stage(entries, codec_name).await?;
        self.install(area).await
    }

    /// Best-effort removal of a staging area that will never be installed.
    pub async fn abandon(&self, area: &StagingArea) {
        match self.fs.remove_dir_all(area.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                staging = %area.path().display(),
                error = %e,
                "failed to remove abandoned staging area"
            ),
        }
    }
}

/// Move the current snapshot out of the canonical location.
///
/// Returns where it went, or `None` if there was nothing to move. A backup
/// left behind by an earlier save is replaced when a canonical snapshot
/// exists, and kept when it does not (it is then the newest good snapshot).
pub async fn displace_previous(
    fs: &dyn Filesystem,
    config: &CacheConfig,
) -> Result<Option<PathBuf>, PersistError> {
    let current = config.snapshot_dir();
    let backup = config.backup_dir();

    if !fs
        .exists(&current)
        .await
        .map_err(|e| PersistError::write(&current, e))?
    {
        return Ok(None);
    }

    if fs
        .exists(&backup)
        .await
        .map_err(|e| PersistError::write(&backup, e))?
    {
        tracing::debug!(backup = %backup.display(), "removing stale snapshot backup");
        fs.remove_dir_all(&backup)
            .await
            .map_err(|e| PersistError::write(&backup, e))?;
    }

    fs.rename(&current, &backup).await.map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            PersistError::TargetExists {
                path: backup.clone(),
            }
        } else {
            PersistError::write(&current, e)
        }
    })?;
    Ok(Some(backup))
}

/// Put a displaced snapshot back after a failed install.
pub async fn restore_previous(
    fs: &dyn Filesystem,
    config: &CacheConfig,
    backup: &Path,
) -> Result<(), PersistError> {
    let current = config.snapshot_dir();
    fs.rename(backup, &current).await.map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            PersistError::TargetExists { path: current.clone() }
        } else {
            PersistError::write(&current, e)
        }
    })
}

/// Best-effort removal of a displaced snapshot once its replacement is installed.
pub async fn discard_backup(fs: &dyn Filesystem, backup: &Path) {
    if let Err(e) = fs.remove_dir_all(backup).await {
        tracing::warn!(
            backup = %backup.display(),
            error = %e,
            "failed to remove previous snapshot"
        );
    }
}
