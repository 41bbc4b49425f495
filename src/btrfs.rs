// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Btrfs subvolume primitives.
//!
//! Snapshots are copy-on-write subvolumes, not plain directories. Creating
//! and removing them must go through the filesystem's own primitives so
//! that either the whole snapshot exists or none of it does. A recursive file
//! delete on a snapshot is never correct.

use crate::system::{CommandRunner, SystemRunner};

use std::{ffi::OsStr, path::Path};
use tracing::{debug, instrument};

/// Filesystem type name reported for Btrfs.
pub const BTRFS: &str = "btrfs";

/// Operations on Btrfs subvolumes.
pub trait Subvolumes {
    /// Name of the filesystem type that `path` resides on.
    fn filesystem_type(&self, path: &Path) -> Result<String>;

    /// Check if `path` is itself a subvolume.
    fn is_subvolume(&self, path: &Path) -> bool;

    /// Create an empty subvolume at `path`.
    fn create_subvolume(&self, path: &Path) -> Result<()>;

    /// Take a read-only snapshot of `source` at `dest`.
    fn snapshot_readonly(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Delete subvolume at `path`.
    fn delete_subvolume(&self, path: &Path) -> Result<()>;

    /// Force pending changes of filesystem holding `path` to disk.
    fn sync(&self, path: &Path) -> Result<()>;

    /// Require `path` to reside on Btrfs.
    ///
    /// # Errors
    ///
    /// - Return [`BtrfsError::NotBtrfs`] if it does not.
    fn require_btrfs(&self, path: &Path) -> Result<()> {
        let found = self.filesystem_type(path)?;
        if found != BTRFS {
            return Err(BtrfsError::NotBtrfs {
                path: path.display().to_string(),
                found,
            });
        }

        Ok(())
    }
}

impl<S> Subvolumes for &S
where
    S: Subvolumes,
{
    fn filesystem_type(&self, path: &Path) -> Result<String> {
        (**self).filesystem_type(path)
    }

    fn is_subvolume(&self, path: &Path) -> bool {
        (**self).is_subvolume(path)
    }

    fn create_subvolume(&self, path: &Path) -> Result<()> {
        (**self).create_subvolume(path)
    }

    fn snapshot_readonly(&self, source: &Path, dest: &Path) -> Result<()> {
        (**self).snapshot_readonly(source, dest)
    }

    fn delete_subvolume(&self, path: &Path) -> Result<()> {
        (**self).delete_subvolume(path)
    }

    fn sync(&self, path: &Path) -> Result<()> {
        (**self).sync(path)
    }
}

/// Subvolume operations through the `btrfs` command line tool.
#[derive(Debug, Default, Clone)]
pub struct BtrfsCli<R = SystemRunner>
where
    R: CommandRunner,
{
    runner: R,
}

impl<R> BtrfsCli<R>
where
    R: CommandRunner,
{
    /// Construct new `btrfs` backed subvolume handler.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R> Subvolumes for BtrfsCli<R>
where
    R: CommandRunner,
{
    fn filesystem_type(&self, path: &Path) -> Result<String> {
        let output = self.runner.call(
            "stat",
            [OsStr::new("--file-system"), OsStr::new("--format=%T"), path.as_os_str()],
        )?;
        let fstype = output.trim().to_string();
        debug!("{:?} resides on {fstype}", path.display());

        Ok(fstype)
    }

    fn is_subvolume(&self, path: &Path) -> bool {
        self.runner
            .probe("btrfs", [OsStr::new("subvolume"), OsStr::new("show"), path.as_os_str()])
    }

    #[instrument(skip(self), level = "debug")]
    fn create_subvolume(&self, path: &Path) -> Result<()> {
        self.runner.call(
            "btrfs",
            [OsStr::new("subvolume"), OsStr::new("create"), path.as_os_str()],
        )?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn snapshot_readonly(&self, source: &Path, dest: &Path) -> Result<()> {
        self.runner.call(
            "btrfs",
            [
                OsStr::new("subvolume"),
                OsStr::new("snapshot"),
                OsStr::new("-r"),
                source.as_os_str(),
                dest.as_os_str(),
            ],
        )?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn delete_subvolume(&self, path: &Path) -> Result<()> {
        self.runner.call(
            "btrfs",
            [OsStr::new("subvolume"), OsStr::new("delete"), path.as_os_str()],
        )?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn sync(&self, path: &Path) -> Result<()> {
        self.runner.call(
            "btrfs",
            [OsStr::new("filesystem"), OsStr::new("sync"), path.as_os_str()],
        )?;

        Ok(())
    }
}

/// Btrfs operation error types.
#[derive(Debug, thiserror::Error)]
pub enum BtrfsError {
    /// Path is on some other filesystem.
    #[error("{path:?} is on {found}, not btrfs")]
    NotBtrfs { path: String, found: String },

    /// Underlying tool failed.
    #[error(transparent)]
    Command(#[from] crate::system::CommandError),
}

/// Friendly result alias :3
pub type Result<T, E = BtrfsError> = std::result::Result<T, E>;
