use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// An exclusive advisory lock on a zero-byte sidecar file.
///
/// The lock is released and the sidecar removed when the guard is dropped,
/// on every exit path. Removal is best-effort: another process may already
/// have recreated or deleted the file.
#[derive(Debug)]
pub struct ScopedFileLock {
    file: File,
    path: PathBuf,
}

impl ScopedFileLock {
    /// Blocks until the exclusive lock on `path` is acquired.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Blocks until exclusive lock is acquired
        file.lock_exclusive()?;

        Ok(Self { file, path })
    }

    /// The sidecar lock file for `target`: `<name>.lck` next to it.
    pub fn sidecar(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lck");
        target.with_file_name(name)
    }
}

impl Drop for ScopedFileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = ?self.path, %err, "unable to release lock");
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!(path = ?self.path, %err, "unable to remove lock file"),
        }
    }
}

/// Result of reading a file that may legitimately not exist yet.
#[derive(Debug)]
pub enum LoadResult {
    Loaded(String),
    NotFound,
}

pub fn read_if_exists(path: &Path) -> Result<LoadResult> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(LoadResult::Loaded(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(LoadResult::NotFound),
        Err(err) => Err(err.into()),
    }
}

/// Durably replaces `path` with `contents`.
///
/// The data is written to a temp file in the same directory and synced
/// before being renamed over the target. Callers hold whatever lock guards
/// the target. If the rename can't be done atomically the target is
/// overwritten in place, which leaves a window where a crash can truncate it.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(err) => {
            debug!(path = ?path, error = %err.error, "atomic move not supported");
            let tmp = err.file;
            fs::copy(tmp.path(), path).map_err(|source| Error::Persist {
                path: path.to_path_buf(),
                source,
            })?;
            File::open(path)?.sync_all()?;
            Ok(())
        }
    }
}
