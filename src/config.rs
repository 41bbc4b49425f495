// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of grubsnap's configuration file. Every component
//! receives the parsed [`Settings`] record explicitly at construction, so
//! there is no global state shared between the setup logic, the snapshot
//! creator, and the retention policy.
//!
//! # General Layout
//!
//! The configuration file is TOML split into three tables: `[snapshot]`
//! describes what gets snapshotted and where it is kept, `[install]`
//! describes where generated artifacts are written, and `[timeshift]`
//! describes the optional handoff to Timeshift. Every field has a default,
//! so an empty or missing file is valid.

use crate::path;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::debug;

/// Complete grubsnap configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Snapshot creation and retention settings.
    pub snapshot: SnapshotSettings,

    /// Locations of generated artifacts.
    pub install: InstallSettings,

    /// Timeshift handoff settings.
    pub timeshift: TimeshiftSettings,
}

impl Settings {
    /// Load settings from configuration file at `path`.
    ///
    /// A missing configuration file is not an error, defaults are used
    /// instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read for any reason
    ///   other than not existing.
    /// - Return [`ConfigError::Deserialize`] if file is not valid TOML.
    /// - Return [`ConfigError::Invalid`] if a setting is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = match read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {:?}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    source: err,
                    path: path.to_path_buf(),
                })
            }
        };
        data.parse()
    }

    /// Check that settings are usable.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] if retention count is zero, the
    ///   prefix is empty or contains a path separator, or snapshot paths are
    ///   relative.
    pub fn validate(&self) -> Result<()> {
        let snapshot = &self.snapshot;
        if snapshot.keep == 0 {
            return Err(ConfigError::Invalid(
                "snapshot.keep must be at least 1".into(),
            ));
        }

        if snapshot.prefix.is_empty() || snapshot.prefix.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "snapshot.prefix {:?} must be a non-empty file name",
                snapshot.prefix
            )));
        }

        for (key, value) in [
            ("snapshot.source", &snapshot.source),
            ("snapshot.directory", &snapshot.directory),
        ] {
            if value.is_relative() {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be an absolute path, got {:?}",
                    value.display()
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        let snapshot = &mut settings.snapshot;
        snapshot.source = expand(&snapshot.source)?;
        snapshot.directory = expand(&snapshot.directory)?;
        snapshot.lock_file = expand(&snapshot.lock_file)?;

        let install = &mut settings.install;
        install.helper_dir = expand(&install.helper_dir)?;
        install.unit_dir = expand(&install.unit_dir)?;
        install.grub_cfg = expand(&install.grub_cfg)?;
        install.grub_btrfs_config = expand(&install.grub_btrfs_config)?;

        settings.timeshift.config = expand(&settings.timeshift.config)?;

        settings.validate()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// What gets snapshotted, where it goes, and how many are kept.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Subvolume to take read-only snapshots of.
    pub source: PathBuf,

    /// Dedicated subvolume that holds every snapshot.
    pub directory: PathBuf,

    /// Name prefix shared by every snapshot grubsnap manages.
    pub prefix: String,

    /// Number of most recent snapshots the retention policy keeps.
    pub keep: usize,

    /// Lock file that serializes creation and cleanup.
    pub lock_file: PathBuf,

    /// How long creation or cleanup waits for the other to release the lock.
    pub lock_timeout_secs: u64,
}

impl SnapshotSettings {
    /// Lock wait limit as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            source: path::default_snapshot_source(),
            directory: path::default_snapshot_dir(),
            prefix: "boot_auto_snap".into(),
            keep: 7,
            lock_file: path::default_lock_file(),
            lock_timeout_secs: 600,
        }
    }
}

/// Where setup writes generated artifacts.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallSettings {
    /// Packages that must be present before anything else is configured.
    pub packages: Vec<String>,

    /// Directory receiving the creation and cleanup helper scripts.
    pub helper_dir: PathBuf,

    /// Directory receiving generated systemd units.
    pub unit_dir: PathBuf,

    /// Output path for GRUB configuration regeneration.
    pub grub_cfg: PathBuf,

    /// Configuration file of grub-btrfs.
    pub grub_btrfs_config: PathBuf,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            packages: vec![
                "btrfs-progs".into(),
                "grub-btrfs".into(),
                "inotify-tools".into(),
            ],
            helper_dir: path::default_helper_dir(),
            unit_dir: path::default_unit_dir(),
            grub_cfg: path::default_grub_cfg(),
            grub_btrfs_config: path::default_grub_btrfs_config(),
        }
    }
}

/// Optional handoff to Timeshift.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeshiftSettings {
    /// Timeshift's JSON configuration file.
    pub config: PathBuf,

    /// Wall-clock limit for checking that Timeshift actually works.
    pub verify_timeout_secs: u64,
}

impl TimeshiftSettings {
    /// Verification limit as a [`Duration`].
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

impl Default for TimeshiftSettings {
    fn default() -> Self {
        Self {
            config: path::default_timeshift_config(),
            verify_timeout_secs: 30,
        }
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(shellexpand::full(path.to_string_lossy().as_ref())
        .map_err(ConfigError::ShellExpansion)?
        .into_owned()
        .into())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Setting holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
