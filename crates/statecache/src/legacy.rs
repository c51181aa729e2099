//! Legacy migration guard.
//!
//! Older versions wrote the whole state as one flat file (`redux.state`) next
//! to where the snapshot directory now lives. That format is never read. The
//! file is deleted on every save, since an older binary run against the same
//! cache can write it again at any time.

use std::io;
use std::path::Path;

use crate::fs::Filesystem;

/// What happened to the legacy file during a save.
#[derive(Debug)]
pub enum LegacyCleanup {
    /// There was no legacy file.
    Absent,
    /// The legacy file was deleted.
    Removed,
    /// The legacy file is still there; the save itself succeeded.
    Failed(io::Error),
}

impl LegacyCleanup {
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Delete the legacy file if present. Never fails; problems are logged and
/// returned as [`LegacyCleanup::Failed`].
pub async fn cleanup_legacy(fs: &dyn Filesystem, legacy: &Path) -> LegacyCleanup {
    match fs.exists(legacy).await {
        Ok(false) => LegacyCleanup::Absent,
        Ok(true) => match fs.remove_file(legacy).await {
            Ok(()) => {
                tracing::info!(path = %legacy.display(), "removed legacy state file");
                LegacyCleanup::Removed
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => LegacyCleanup::Absent,
            Err(e) => {
                tracing::warn!(
                    path = %legacy.display(),
                    error = %e,
                    "failed to remove legacy state file"
                );
                LegacyCleanup::Failed(e)
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %legacy.display(),
                error = %e,
                "failed to check for legacy state file"
            );
            LegacyCleanup::Failed(e)
        }
    }
}

/// Check for a legacy file without touching it.
pub async fn detect_legacy(fs: &dyn Filesystem, legacy: &Path) -> bool {
    match fs.exists(legacy).await {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(
                path = %legacy.display(),
                error = %e,
                "could not check for legacy state file"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_fs::{FsOp, MemoryFs};

    const LEGACY: &str = "/site/.cache/redux.state";

    #[tokio::test]
    async fn test_absent_is_a_no_op() {
        let fs = MemoryFs::new();
        let outcome = cleanup_legacy(&fs, Path::new(LEGACY)).await;
        assert!(matches!(outcome, LegacyCleanup::Absent));
        assert_eq!(fs.calls(FsOp::RemoveFile), 0);
    }

    #[tokio::test]
    async fn test_removes_legacy_file_every_time() {
        let fs = MemoryFs::new();
        let legacy = Path::new(LEGACY);

        fs.seed_file(legacy, b"legacy location for cache");
        assert!(cleanup_legacy(&fs, legacy).await.is_removed());
        assert!(fs.file(legacy).is_none());

        // Recreated by an older binary
        fs.seed_file(legacy, b"legacy location for cache");
        assert!(cleanup_legacy(&fs, legacy).await.is_removed());
        assert!(fs.file(legacy).is_none());
    }

    #[tokio::test]
    async fn test_removal_failure_is_reported_not_raised() {
        let fs = MemoryFs::new();
        let legacy = Path::new(LEGACY);
        fs.seed_file(legacy, b"legacy");
        fs.fail_on(FsOp::RemoveFile, 0);

        let outcome = cleanup_legacy(&fs, legacy).await;
        assert!(outcome.is_failed());
        assert!(fs.file(legacy).is_some());
    }

    #[tokio::test]
    async fn test_detect_does_not_delete() {
        let fs = MemoryFs::new();
        let legacy = Path::new(LEGACY);
        assert!(!detect_legacy(&fs, legacy).await);

        fs.seed_file(legacy, b"legacy");
        assert!(detect_legacy(&fs, legacy).await);
        assert!(fs.file(legacy).is_some());
    }
}
