//! In-memory filesystem for tests.
//!
//! Keeps files and directories in ordered maps keyed by path. Renaming a
//! directory moves its whole subtree and refuses an existing target, which is
//! the contract the snapshot writer relies on. Every operation is counted and
//! any operation can be made to fail once, on a chosen call. Changes made by
//! another process can be slipped in just before a chosen call, to drive
//! reader/writer races deterministically.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::fs::{target_exists, Filesystem};
use crate::staging::{staging_dir_name, StagingId};

/// Operations on a [`MemoryFs`], for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    WriteFile,
    ReadFile,
    Exists,
    Rename,
    MakeTempDir,
    CreateDir,
    ReadDir,
    RemoveFile,
    RemoveDir,
}

#[derive(Debug)]
struct Fault {
    op: FsOp,
    /// Matching calls still to let through before failing.
    skip: usize,
}

/// A change another process makes to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChange {
    Rename { from: PathBuf, to: PathBuf },
    RemoveDir(PathBuf),
}

#[derive(Debug)]
struct Interleave {
    op: FsOp,
    path: PathBuf,
    changes: Vec<ExternalChange>,
}

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    calls: HashMap<FsOp, usize>,
    faults: Vec<Fault>,
    interleaves: Vec<Interleave>,
}

impl Inner {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.dirs.contains(parent),
            _ => true,
        }
    }

    fn enter(&mut self, op: FsOp, path: &Path) -> io::Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;

        if let Some(index) = self
            .interleaves
            .iter()
            .position(|i| i.op == op && i.path == path)
        {
            let interleave = self.interleaves.remove(index);
            for change in interleave.changes {
                match change {
                    ExternalChange::Rename { from, to } => self.move_tree(&from, &to)?,
                    ExternalChange::RemoveDir(dir) => self.remove_tree(&dir)?,
                }
            }
        }

        if let Some(index) = self.faults.iter().position(|f| f.op == op) {
            if self.faults[index].skip == 0 {
                self.faults.remove(index);
                return Err(io::Error::other(format!(
                    "injected {:?} failure at {}",
                    op,
                    path.display()
                )));
            }
            self.faults[index].skip -= 1;
        }
        Ok(())
    }

    fn move_tree(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        if !self.exists(from) {
            return Err(not_found(from));
        }
        if self.exists(to) {
            return Err(target_exists(to));
        }
        if !self.parent_exists(to) {
            return Err(not_found(to));
        }

        let moved_files: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|path| path.starts_with(from))
            .cloned()
            .collect();
        for old in moved_files {
            if let Some(data) = self.files.remove(&old) {
                self.files.insert(rebase(&old, from, to), data);
            }
        }

        let moved_dirs: Vec<PathBuf> = self
            .dirs
            .iter()
            .filter(|path| path.starts_with(from))
            .cloned()
            .collect();
        for old in moved_dirs {
            self.dirs.remove(&old);
            self.dirs.insert(rebase(&old, from, to));
        }
        Ok(())
    }

    fn remove_tree(&mut self, path: &Path) -> io::Result<()> {
        if !self.dirs.contains(path) {
            return Err(not_found(path));
        }
        self.files.retain(|p, _| !p.starts_with(path));
        self.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: {}", path.display()),
    )
}

/// Filesystem held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryFs {
    inner: Mutex<Inner>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the `(skip + 1)`-th next call of `op` fail.
    pub fn fail_on(&self, op: FsOp, skip: usize) {
        self.lock().faults.push(Fault { op, skip });
    }

    /// Apply `changes` just before the next `op` call on `path`, as if another
    /// process made them. The call itself then sees the changed tree.
    pub fn interleave(&self, op: FsOp, path: &Path, changes: Vec<ExternalChange>) {
        self.lock().interleaves.push(Interleave {
            op,
            path: path.to_path_buf(),
            changes,
        });
    }

    /// How many times `op` has been called.
    pub fn calls(&self, op: FsOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Contents of a file, if present.
    pub fn file(&self, path: &Path) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Put a file in place without counting a call, creating parent directories.
    pub fn seed_file(&self, path: &Path, data: &[u8]) {
        let mut inner = self.lock();
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.as_os_str().is_empty() {
                inner.dirs.insert(ancestor.to_path_buf());
            }
        }
        inner.files.insert(path.to_path_buf(), data.to_vec());
    }

    /// Every file under `root`, with its contents.
    pub fn files_under(&self, root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        self.lock()
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(root))
            .map(|(path, data)| (path.clone(), data.clone()))
            .collect()
    }
}

#[async_trait]
impl Filesystem for MemoryFs {
    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        inner.enter(FsOp::WriteFile, path)?;
        if inner.dirs.contains(path) {
            return Err(io::Error::other(format!("is a directory: {}", path.display())));
        }
        if !inner.parent_exists(path) {
            return Err(not_found(path));
        }
        inner.files.insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut inner = self.lock();
        inner.enter(FsOp::ReadFile, path)?;
        inner.files.get(path).cloned().ok_or_else(|| not_found(path))
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        let mut inner = self.lock();
        inner.enter(FsOp::Exists, path)?;
        Ok(inner.exists(path))
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        inner.enter(FsOp::Rename, from)?;
        inner.move_tree(from, to)
    }

    async fn make_temp_dir(&self, parent: &Path, prefix: &str) -> io::Result<PathBuf> {
        let mut inner = self.lock();
        inner.enter(FsOp::MakeTempDir, parent)?;
        if !inner.dirs.contains(parent) {
            return Err(not_found(parent));
        }
        let path = parent.join(staging_dir_name(prefix, &StagingId::new()));
        if inner.exists(&path) {
            return Err(target_exists(&path));
        }
        inner.dirs.insert(path.clone());
        Ok(path)
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        inner.enter(FsOp::CreateDir, path)?;
        if inner.files.contains_key(path) {
            return Err(target_exists(path));
        }
        for ancestor in path.ancestors() {
            if !ancestor.as_os_str().is_empty() {
                inner.dirs.insert(ancestor.to_path_buf());
            }
        }
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut inner = self.lock();
        inner.enter(FsOp::ReadDir, path)?;
        if !inner.dirs.contains(path) {
            return Err(not_found(path));
        }
        let children = inner
            .files
            .keys()
            .chain(inner.dirs.iter())
            .filter(|child| child.parent() == Some(path))
            .filter_map(|child| child.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect::<BTreeSet<_>>();
        Ok(children.into_iter().collect())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        inner.enter(FsOp::RemoveFile, path)?;
        inner.files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        inner.enter(FsOp::RemoveDir, path)?;
        inner.remove_tree(path)
    }
}

fn rebase(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
        Ok(rest) => to.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn test_write_requires_parent() -> Result<()> {
        let fs = MemoryFs::new();
        let err = fs.write_file(Path::new("/c/a"), b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs.create_dir_all(Path::new("/c")).await?;
        fs.write_file(Path::new("/c/a"), b"x").await?;
        assert_eq!(fs.file(Path::new("/c/a")), Some(b"x".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() -> Result<()> {
        let fs = MemoryFs::new();
        fs.create_dir_all(Path::new("/c")).await?;
        let staging = fs.make_temp_dir(Path::new("/c"), ".tmp-").await?;
        fs.create_dir_all(&staging.join("sub")).await?;
        fs.write_file(&staging.join("a"), b"1").await?;
        fs.write_file(&staging.join("sub/b"), b"2").await?;

        fs.rename(&staging, Path::new("/c/state")).await?;

        assert!(!fs.exists(&staging).await?);
        assert_eq!(fs.file(Path::new("/c/state/a")), Some(b"1".to_vec()));
        assert_eq!(fs.file(Path::new("/c/state/sub/b")), Some(b"2".to_vec()));
        assert_eq!(fs.read_dir(Path::new("/c/state")).await?, vec!["a", "sub"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_does_not_touch_sibling_prefixes() -> Result<()> {
        let fs = MemoryFs::new();
        fs.seed_file(Path::new("/c/state/a"), b"1");
        fs.seed_file(Path::new("/c/state.bak/a"), b"old");

        fs.rename(Path::new("/c/state"), Path::new("/c/next")).await?;

        assert_eq!(fs.file(Path::new("/c/state.bak/a")), Some(b"old".to_vec()));
        assert_eq!(fs.file(Path::new("/c/next/a")), Some(b"1".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_refuses_existing_target() -> Result<()> {
        let fs = MemoryFs::new();
        fs.seed_file(Path::new("/c/state/a"), b"old");
        fs.seed_file(Path::new("/c/tmp/a"), b"new");

        let err = fs
            .rename(Path::new("/c/tmp"), Path::new("/c/state"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs.file(Path::new("/c/state/a")), Some(b"old".to_vec()));
        assert_eq!(fs.file(Path::new("/c/tmp/a")), Some(b"new".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_fault_injection_fires_once() -> Result<()> {
        let fs = MemoryFs::new();
        fs.create_dir_all(Path::new("/c")).await?;
        fs.fail_on(FsOp::WriteFile, 1);

        fs.write_file(Path::new("/c/a"), b"1").await?;
        assert!(fs.write_file(Path::new("/c/b"), b"2").await.is_err());
        fs.write_file(Path::new("/c/b"), b"2").await?;

        assert_eq!(fs.calls(FsOp::WriteFile), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_interleaved_change_lands_before_call() -> Result<()> {
        let fs = MemoryFs::new();
        fs.seed_file(Path::new("/c/state/a"), b"1");
        fs.interleave(
            FsOp::ReadFile,
            Path::new("/c/state/a"),
            vec![ExternalChange::Rename {
                from: PathBuf::from("/c/state"),
                to: PathBuf::from("/c/state.bak"),
            }],
        );

        let err = fs.read_file(Path::new("/c/state/a")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs.read_file(Path::new("/c/state.bak/a")).await?, b"1");

        // Fires once
        fs.seed_file(Path::new("/c/state/a"), b"2");
        assert_eq!(fs.read_file(Path::new("/c/state/a")).await?, b"2");
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_dir_all() -> Result<()> {
        let fs = MemoryFs::new();
        fs.seed_file(Path::new("/c/state/a"), b"1");
        fs.seed_file(Path::new("/c/keep"), b"2");

        fs.remove_dir_all(Path::new("/c/state")).await?;

        assert!(!fs.exists(Path::new("/c/state")).await?);
        assert!(fs.files_under(Path::new("/c/state")).is_empty());
        assert_eq!(fs.read_dir(Path::new("/c")).await?, vec!["keep"]);
        Ok(())
    }
}
