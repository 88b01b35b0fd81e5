//! Per-key advisory lock.
//!
//! The lock is an `flock(LOCK_EX | LOCK_NB)` on a marker file next to the
//! payload. The holder unlinks the marker *before* unlocking, so a waiter
//! that opened the old marker can end up locking an unlinked inode. After
//! every successful `flock` we therefore check that the path still names the
//! inode we hold, and start over if it does not.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use snapstat_core::{SnapstatError, SnapstatResult};
use tracing::debug;

#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Exclusive lock on one cache key, released on drop.
#[derive(Debug)]
pub(crate) struct KeyLock {
    file: File,
    path: PathBuf,
}

impl KeyLock {
    /// Try to take the lock up to `attempts` times, sleeping `backoff`
    /// between contended attempts.
    ///
    /// Gives up with [`SnapstatError::LockBusy`].
    pub(crate) fn acquire(
        path: &Path,
        key: &str,
        attempts: u32,
        backoff: Duration,
    ) -> SnapstatResult<Self> {
        let mut contended = false;
        for attempt in 0..attempts.max(1) {
            if contended {
                thread::sleep(backoff);
            }

            let file = open_marker(path)?;
            if !try_lock(&file)? {
                debug!(key, attempt, "Cache lock busy");
                contended = true;
                continue;
            }

            if names_same_file(&file, path) {
                return Ok(KeyLock {
                    file,
                    path: path.to_path_buf(),
                });
            }

            // Marker was replaced between open and lock; retry immediately.
            contended = false;
        }

        Err(SnapstatError::lock_busy(key))
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock, then release.
        let _ = fs::remove_file(&self.path);
        unlock(&self.file);
    }
}

/// Remove a marker nobody holds.
///
/// Returns false when the marker is locked or already gone. A waiter that
/// opened it before the unlink notices through its inode check.
pub(crate) fn remove_abandoned(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
        return false;
    };
    if !matches!(try_lock(&file), Ok(true)) {
        return false;
    }
    let removed = names_same_file(&file, path) && fs::remove_file(path).is_ok();
    unlock(&file);
    removed
}

fn open_marker(path: &Path) -> SnapstatResult<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    options.mode(0o600);

    options
        .open(path)
        .map_err(|e| SnapstatError::io(format!("open lock file {}", path.display()), e))
}

#[cfg(unix)]
fn try_lock(file: &File) -> SnapstatResult<bool> {
    // SAFETY: fd is owned by `file` and valid for the duration of the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(SnapstatError::system(
            format!("flock failed: {err}"),
            err.raw_os_error().unwrap_or(0),
        ))
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> SnapstatResult<bool> {
    Err(SnapstatError::not_supported(
        "cache lock",
        snapstat_core::get_platform(),
    ))
}

#[cfg(unix)]
fn unlock(file: &File) {
    // SAFETY: fd is owned by `file`; closing it would release the lock anyway
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(unix)]
fn names_same_file(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn names_same_file(_file: &File, _path: &Path) -> bool {
    true
}
