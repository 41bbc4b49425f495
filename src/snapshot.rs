// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot domain representation.
//!
//! A __snapshot__ is a read-only Btrfs snapshot of the source subvolume kept
//! as an immediate child of the snapshot directory, `/.snapshots` by default.
//!
//! # Naming
//!
//! Every snapshot grubsnap manages is named `<prefix>_<timestamp>`, where the
//! timestamp is local time formatted as `YYYY-MM-DD_HHMMSS`. Given that
//! naming scheme, lexicographic order of names matches creation order. There
//! is no index or manifest; the snapshot directory itself is the only record
//! of what exists.
//!
//! Timestamps only have one second of resolution. When a snapshot with the
//! same name already exists, a sequence suffix `.<n>` is appended, e.g.,
//! `boot_auto_snap_2024-01-01_000000.1`, so two creations within the same
//! second never collide.
//!
//! # Lifecycle
//!
//! Snapshots are created by [`create`], destroyed by [`retention`], and never
//! mutated in place.

pub mod create;
pub mod retention;

use chrono::NaiveDateTime;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_dir, symlink_metadata, Metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::debug;

/// Format of the timestamp portion of a snapshot name.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Structured snapshot name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotName {
    prefix: String,
    timestamp: NaiveDateTime,
    sequence: Option<u32>,
}

impl SnapshotName {
    /// Construct new snapshot name without sequence suffix.
    pub fn new(prefix: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            prefix: prefix.into(),
            timestamp,
            sequence: None,
        }
    }

    /// Same name with sequence suffix `n`.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Parse a directory name that was produced for `prefix`.
    ///
    /// Returns `None` if name does not follow the naming scheme.
    pub fn parse(prefix: &str, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(prefix)?.strip_prefix('_')?;
        let (stamp, sequence) = match rest.split_once('.') {
            Some((stamp, sequence)) => (stamp, Some(sequence.parse().ok()?)),
            None => (rest, None),
        };
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

        Some(Self {
            prefix: prefix.into(),
            timestamp,
            sequence,
        })
    }

    /// Time the snapshot was taken.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }
}

impl Display for SnapshotName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{}_{}",
            self.prefix,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )?;
        if let Some(sequence) = self.sequence {
            write!(fmt, ".{sequence}")?;
        }

        Ok(())
    }
}

/// Snapshot found in the snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Directory name of the snapshot.
    pub name: String,

    /// Absolute path to the snapshot.
    pub path: PathBuf,

    /// Modification time of the snapshot directory.
    pub modified: SystemTime,
}

/// List snapshots in `dir` whose name starts with `prefix`.
///
/// Only immediate subdirectories are considered. Result is ordered by
/// modification time, oldest first. Entries with equal modification time
/// keep name order.
///
/// # Errors
///
/// - Return [`SnapshotError::ReadDir`] if `dir` cannot be read.
/// - Return [`SnapshotError::Metadata`] if an entry cannot be inspected.
pub fn list_snapshots(dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<Snapshot>> {
    let dir = dir.as_ref();
    let entries = read_dir(dir).map_err(|err| SnapshotError::ReadDir {
        source: err,
        path: dir.to_path_buf(),
    })?;

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SnapshotError::ReadDir {
            source: err,
            path: dir.to_path_buf(),
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) {
            continue;
        }

        let path = entry.path();
        let Some(metadata) = entry_metadata(&path)? else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }

        let modified = metadata.modified().map_err(|err| SnapshotError::Metadata {
            source: err,
            path: path.clone(),
        })?;
        snapshots.push(Snapshot {
            name,
            path,
            modified,
        });
    }

    // INVARIANT: Stable sort by mtime over name order, so ties stay deterministic.
    snapshots.sort_by(|a, b| a.name.cmp(&b.name));
    snapshots.sort_by_key(|snapshot| snapshot.modified);

    Ok(snapshots)
}

// INVARIANT: An entry deleted between listing and inspection is skipped.
fn entry_metadata(path: &Path) -> Result<Option<Metadata>> {
    match symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("{:?} vanished while listing, skip it", path.display());
            Ok(None)
        }
        Err(err) => Err(SnapshotError::Metadata {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

/// Snapshot listing error types.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Snapshot directory cannot be read.
    #[error("failed to read snapshot directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Snapshot entry cannot be inspected.
    #[error("failed to inspect snapshot {:?}", path.display())]
    Metadata {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;
