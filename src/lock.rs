// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mutual exclusion for the snapshot directory.
//!
//! The boot-time creation unit and the daily cleanup timer can fire at the
//! same moment, e.g., a persistent timer catching up right after boot. Both
//! take an exclusive advisory lock on a shared lock file before touching the
//! snapshot directory. Whoever comes second waits for the first to finish,
//! so the two run one after the other instead of one being dropped. Waiting
//! is bounded; a lock held for longer than that is reported as
//! [`LockError::Busy`].

use std::{
    fs::{File, OpenOptions, TryLockError},
    path::{Path, PathBuf},
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held exclusive lock on the snapshot directory.
///
/// Released when dropped.
#[derive(Debug)]
pub struct SnapshotLock {
    file: File,
    path: PathBuf,
}

impl SnapshotLock {
    /// Acquire exclusive lock through lock file at `path`.
    ///
    /// Creates the lock file and its parent directories if needed. Waits up
    /// to `timeout` for another holder to release the lock.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Busy`] if another process still holds the lock
    ///   after `timeout`.
    /// - Return [`LockError::Open`] if lock file cannot be opened.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|err| LockError::Open {
                source: err,
                path: path.clone(),
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| LockError::Open {
                source: err,
                path: path.clone(),
            })?;

        let deadline = Instant::now() + timeout;
        let mut announced = false;
        loop {
            match file.try_lock() {
                Ok(()) => {
                    debug!("acquired lock {:?}", path.display());
                    return Ok(Self { file, path });
                }
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::Busy { path, timeout });
                    }

                    if !announced {
                        info!("wait for lock {:?} held by another grubsnap", path.display());
                        announced = true;
                    }
                    sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(TryLockError::Error(err)) => {
                    return Err(LockError::Open { source: err, path });
                }
            }
        }
    }

    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        if let Err(error) = self.file.unlock() {
            debug!("failed to release lock {:?}: {error}", self.path.display());
        }
    }
}

/// Lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another grubsnap process kept the snapshot directory for too long.
    #[error("snapshot directory is busy, lock {:?} still held after {timeout:?}", path.display())]
    Busy { path: PathBuf, timeout: Duration },

    /// Lock file cannot be opened or locked.
    #[error("failed to open lock file {:?}", path.display())]
    Open {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;
