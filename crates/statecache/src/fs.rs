//! Filesystem capability used by the snapshot writer and reader.
//!
//! Everything the persistence layer does to disk goes through [`Filesystem`],
//! so tests can swap in [`MemoryFs`](crate::memory_fs::MemoryFs) and drive
//! rename collisions and mid-save failures deterministically.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::staging::{staging_dir_name, StagingId};

/// How many random names `make_temp_dir` tries before giving up.
const TEMP_DIR_ATTEMPTS: usize = 8;

/// Trait for filesystem backends.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Create or truncate `path` and write `data` to it, durably.
    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Read the whole file at `path`.
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Check whether a file or directory exists at `path`.
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Rename `from` to `to`.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if `to` exists. Atomic with
    /// respect to concurrent `exists`/`read_file` on `to`.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create a new, uniquely named directory `{parent}/{prefix}{random}`.
    async fn make_temp_dir(&self, parent: &Path, prefix: &str) -> io::Result<PathBuf>;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Names of the immediate children of a directory.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem, through tokio.
#[derive(Debug, Clone, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Filesystem for LocalFs {
    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from = from.to_path_buf();
        let to = to.to_path_buf();
        tokio::task::spawn_blocking(move || rename_durable(&from, &to))
            .await
            .map_err(io::Error::other)?
    }

    async fn make_temp_dir(&self, parent: &Path, prefix: &str) -> io::Result<PathBuf> {
        for _ in 0..TEMP_DIR_ATTEMPTS {
            let path = parent.join(staging_dir_name(prefix, &StagingId::new()));
            match tokio::fs::create_dir(&path).await {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free temp dir name under {}", parent.display()),
        ))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }
}

/// No-replace rename whose result survives a crash.
///
/// A renamed directory's entries are flushed before the rename, and the
/// directories holding the old and new names after it. An error before the
/// rename leaves `from` in place. Once the rename has happened it is reported
/// as done, and a failed flush is only logged.
fn rename_durable(from: &Path, to: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(from)?.is_dir() {
        sync_dir(from)?;
    }

    rename_noreplace(from, to)?;

    let mut parents: Vec<&Path> = to.parent().into_iter().collect();
    if let Some(parent) = from.parent() {
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }
    for parent in parents {
        if let Err(e) = sync_dir(parent) {
            tracing::warn!(
                dir = %parent.display(),
                error = %e,
                "failed to sync directory after rename"
            );
        }
    }
    Ok(())
}

/// Flush a directory's entries to disk.
#[cfg(unix)]
pub(crate) fn sync_dir(path: &Path) -> io::Result<()> {
    let path = if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    };
    std::fs::File::open(path)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Rename that refuses to replace an existing target.
///
/// Plain rename(2) silently replaces files and empty directories, so on Linux
/// this goes through renameat2(RENAME_NOREPLACE). Filesystems that do not
/// support the flag fall back to a check-then-rename.
#[cfg(target_os = "linux")]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_from = CString::new(from.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let c_to = CString::new(to.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: both pointers come from live CStrings; AT_FDCWD resolves them
    // relative to the working directory like rename(2).
    let rc = unsafe {
        libc::syscall(
            libc::SYS_renameat2,
            libc::AT_FDCWD,
            c_from.as_ptr(),
            libc::AT_FDCWD,
            c_to.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EEXIST) | Some(libc::ENOTEMPTY) => Err(target_exists(to)),
        Some(libc::EINVAL) | Some(libc::ENOSYS) => rename_checked(from, to),
        _ => Err(err),
    }
}

#[cfg(not(target_os = "linux"))]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    rename_checked(from, to)
}

fn rename_checked(from: &Path, to: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(to).is_ok() {
        return Err(target_exists(to));
    }
    std::fs::rename(from, to)
}

pub(crate) fn target_exists(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("rename target exists: {}", path.display()),
    )
}
