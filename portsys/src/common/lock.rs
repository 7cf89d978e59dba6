//! The exclusive lock serializing concurrent invocations against one
//! installed tree.
//!
//! The lock is an OS file lock on `vcpkg.lock` in the installed tree's
//! metadata directory. [`WorkspaceLock::acquire`] blocks until the lock is
//! held; [`WorkspaceLock::try_acquire`] polls for up to 1.5 seconds and
//! then gives up, for callers that prefer to fail fast.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::Duration;

pub const LOCK_FILENAME: &str = "vcpkg.lock";

/// Held for the lifetime of a command that mutates the installed tree.
/// Dropping releases the lock.
#[derive(Debug)]
pub struct WorkspaceLock {
    _file: File,
}

fn open_lock_file(directory: &Path) -> Result<File> {
    super::fs::create_dir_all(directory)?;
    let path = directory.join(LOCK_FILENAME);
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .context(format!("unable to open lock file '{}'", path.display()))
}

impl WorkspaceLock {
    /// Block until the lock is held.
    pub fn acquire(directory: &Path) -> Result<WorkspaceLock> {
        let file = open_lock_file(directory)?;
        file.lock()
            .context("unable to take the installed-tree lock")?;
        Ok(WorkspaceLock { _file: file })
    }

    /// Poll for the lock for roughly 1.5 seconds; `None` means another
    /// process holds it.
    pub fn try_acquire(directory: &Path) -> Result<Option<WorkspaceLock>> {
        let file = open_lock_file(directory)?;
        for _ in 0..3 {
            match file.try_lock() {
                Ok(()) => return Ok(Some(WorkspaceLock { _file: file })),
                Err(std::fs::TryLockError::WouldBlock) => {
                    std::thread::sleep(Duration::from_millis(500));
                }
                Err(std::fs::TryLockError::Error(e)) => {
                    return Err(e).context("unable to take the installed-tree lock");
                }
            }
        }
        Ok(None)
    }
}
