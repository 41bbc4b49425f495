// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot retention policy.
//!
//! Keep the `N` most recent snapshots and delete everything older. Age is
//! judged by modification time of the snapshot directory.
//!
//! # Failure Semantics
//!
//! Cleanup is best effort. Each deletion is attempted on its own, and a
//! failed deletion never stops attempts on the remaining candidates. Partial
//! completion is a valid outcome that is reported through
//! [`RetentionReport`], never retried automatically.

use crate::{
    btrfs::Subvolumes,
    config::SnapshotSettings,
    snapshot::{list_snapshots, Snapshot, SnapshotError},
};

use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Select snapshots that must go to keep only the `keep` newest.
///
/// Expects `snapshots` ordered oldest first, as returned by
/// [`list_snapshots`]. Returns the oldest `snapshots.len() - keep` entries,
/// or nothing if there are at most `keep` snapshots.
pub fn plan(mut snapshots: Vec<Snapshot>, keep: usize) -> Vec<Snapshot> {
    let excess = snapshots.len().saturating_sub(keep);
    snapshots.truncate(excess);
    snapshots
}

/// Outcome of one retention pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Number of snapshots matching the prefix.
    pub matched: usize,

    /// Retention count the pass was run with.
    pub keep: usize,

    /// Snapshots that were selected for deletion.
    pub intended: usize,

    /// Snapshots that were deleted.
    pub deleted: Vec<PathBuf>,

    /// Snapshots that could not be deleted, with the reason why.
    pub failed: Vec<(PathBuf, String)>,
}

impl RetentionReport {
    /// Check if every intended deletion succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies the retention policy to the snapshot directory.
#[derive(Debug)]
pub struct Retention<S>
where
    S: Subvolumes,
{
    settings: SnapshotSettings,
    subvolumes: S,
}

impl<S> Retention<S>
where
    S: Subvolumes,
{
    /// Construct new retention policy.
    pub fn new(settings: SnapshotSettings, subvolumes: S) -> Self {
        Self {
            settings,
            subvolumes,
        }
    }

    /// Delete all but the `keep` newest snapshots.
    ///
    /// Deletion goes through the subvolume delete primitive. Failures are
    /// collected into the returned report instead of aborting the pass.
    ///
    /// # Errors
    ///
    /// - Return [`SnapshotError`] if snapshot directory cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn apply(&self, keep: usize) -> Result<RetentionReport, SnapshotError> {
        let snapshots = list_snapshots(&self.settings.directory, &self.settings.prefix)?;
        let matched = snapshots.len();
        let mut report = RetentionReport {
            matched,
            keep,
            ..Default::default()
        };

        if matched <= keep {
            info!("found {matched} snapshots, keeping up to {keep}: nothing to delete");
            return Ok(report);
        }

        let doomed = plan(snapshots, keep);
        report.intended = doomed.len();
        info!(
            "found {matched} snapshots, keeping {keep}: deleting {} oldest",
            report.intended
        );

        for snapshot in doomed {
            match self.subvolumes.delete_subvolume(&snapshot.path) {
                Ok(()) => {
                    info!("deleted {:?}", snapshot.name);
                    report.deleted.push(snapshot.path);
                }
                Err(error) => {
                    warn!("failed to delete {:?}: {error}", snapshot.name);
                    report.failed.push((snapshot.path, error.to_string()));
                }
            }
        }

        info!(
            "deleted {} of {} snapshots",
            report.deleted.len(),
            report.intended
        );

        Ok(report)
    }
}
