//! Single-instance guard for the namespaces directory.
//!
//! Two controllers reconciling the same data directory would start every
//! router cascade twice, so the process takes an advisory exclusive lock on
//! `<namespaces>/.lock` before anything else runs.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock without blocking.
    ///
    /// # Errors
    /// `Error::LockError` if another process holds it, `Error::IoError` if
    /// the lock file cannot be opened.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        try_lock(&file, path)?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File, path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor stays valid for the lifetime of `file`
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Err(Error::LockError(format!(
            "{} is held by another controller process",
            path.display()
        )));
    }
    Err(Error::IoError(err))
}

#[cfg(not(unix))]
fn try_lock(_file: &File, path: &Path) -> Result<()> {
    Err(Error::LockError(format!(
        "file locking is not supported on this platform: {}",
        path.display()
    )))
}
