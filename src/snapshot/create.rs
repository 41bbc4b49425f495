// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot creation.
//!
//! Take one read-only snapshot of the source subvolume into the snapshot
//! directory. Every precondition is checked before the snapshot primitive
//! runs, and the primitive itself is atomic, so a failed creation never
//! leaves a half-made entry behind.

use crate::{
    btrfs::{BtrfsError, Subvolumes},
    config::SnapshotSettings,
    snapshot::SnapshotName,
};

use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use tracing::{info, instrument};

/// Creates snapshots of the configured source subvolume.
#[derive(Debug)]
pub struct SnapshotCreator<S>
where
    S: Subvolumes,
{
    settings: SnapshotSettings,
    subvolumes: S,
}

impl<S> SnapshotCreator<S>
where
    S: Subvolumes,
{
    /// Construct new snapshot creator.
    pub fn new(settings: SnapshotSettings, subvolumes: S) -> Self {
        Self {
            settings,
            subvolumes,
        }
    }

    /// Take a snapshot named after the current local time.
    ///
    /// # Errors
    ///
    /// See [`SnapshotCreator::create_at`].
    pub fn create(&self) -> Result<PathBuf> {
        self.create_at(Local::now().naive_local())
    }

    /// Take a snapshot named after `timestamp`.
    ///
    /// Verifies that the snapshot directory exists, and that both the source
    /// and the snapshot directory reside on Btrfs. Forces a filesystem sync
    /// once the snapshot exists. Returns path of the new snapshot.
    ///
    /// # Errors
    ///
    /// - Return [`CreateError::MissingDirectory`] if the snapshot directory
    ///   does not exist.
    /// - Return [`CreateError::Btrfs`] if either path is not on Btrfs, or the
    ///   snapshot or sync primitive fails.
    #[instrument(skip(self), level = "debug")]
    pub fn create_at(&self, timestamp: NaiveDateTime) -> Result<PathBuf> {
        let directory = &self.settings.directory;
        if !directory.is_dir() {
            return Err(CreateError::MissingDirectory {
                path: directory.clone(),
            });
        }

        self.subvolumes.require_btrfs(&self.settings.source)?;
        self.subvolumes.require_btrfs(directory)?;

        let dest = self.free_path(SnapshotName::new(&self.settings.prefix, timestamp));
        info!(
            "snapshot {:?} to {:?}",
            self.settings.source.display(),
            dest.display()
        );
        self.subvolumes
            .snapshot_readonly(&self.settings.source, &dest)?;
        self.subvolumes.sync(directory)?;

        Ok(dest)
    }

    // INVARIANT: Never hand out a path that already exists in any form.
    fn free_path(&self, name: SnapshotName) -> PathBuf {
        let directory = &self.settings.directory;
        let mut candidate = directory.join(name.to_string());
        let mut sequence = 1;
        while candidate.symlink_metadata().is_ok() {
            candidate = directory.join(name.clone().with_sequence(sequence).to_string());
            sequence += 1;
        }

        candidate
    }
}

/// Snapshot creation error types.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    /// Snapshot directory is missing.
    #[error("snapshot directory {:?} does not exist", path.display())]
    MissingDirectory { path: PathBuf },

    /// Btrfs precondition or primitive failed.
    #[error(transparent)]
    Btrfs(#[from] BtrfsError),
}

/// Friendly result alias :3
pub type Result<T, E = CreateError> = std::result::Result<T, E>;
