// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! GRUB boot menu integration.
//!
//! Snapshots show up in the boot menu through grub-btrfs. Its generator
//! needs to know where snapshots live, and its daemon, grub-btrfsd, watches
//! that location to rebuild the menu whenever a snapshot comes or goes.
//!
//! # See Also
//!
//! - [grub-btrfs](https://github.com/Antynea/grub-btrfs)

use crate::{
    artifact::UnitFile,
    system::{CommandRunner, SystemRunner},
};

use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Program that regenerates GRUB's configuration.
pub const GRUB_MKCONFIG: &str = "grub-mkconfig";

/// Unit of the grub-btrfs monitoring daemon.
pub const MONITOR_SERVICE: &str = "grub-btrfsd.service";

/// Key naming the snapshot directory in grub-btrfs' configuration.
pub const SNAPSHOT_DIR_KEY: &str = "GRUB_BTRFS_SNAPSHOT_DIR";

/// Generated grub-btrfs configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrubBtrfsConfig {
    snapshot_dir: PathBuf,
}

impl GrubBtrfsConfig {
    /// Construct new grub-btrfs configuration pointing at `snapshot_dir`.
    pub fn new(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
        }
    }
}

impl Display for GrubBtrfsConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(
            fmt,
            "{SNAPSHOT_DIR_KEY}=\"{}\"",
            self.snapshot_dir.display()
        )
    }
}

/// Where grub-btrfsd should look for snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorTarget {
    /// Watch a fixed snapshot directory.
    Directory(PathBuf),

    /// Let the daemon follow Timeshift's snapshot location.
    Timeshift,
}

/// Drop-in overriding how grub-btrfsd is started.
pub fn monitor_drop_in(target: &MonitorTarget) -> UnitFile {
    let exec = match target {
        MonitorTarget::Directory(dir) => {
            format!("/usr/bin/grub-btrfsd --syslog {}", dir.display())
        }
        MonitorTarget::Timeshift => "/usr/bin/grub-btrfsd --syslog --timeshift-auto".into(),
    };

    UnitFile::new()
        .section("Service")
        .entry("ExecStart", "")
        .entry("ExecStart", exec)
}

/// Path of grubsnap's drop-in for grub-btrfsd under `unit_dir`.
pub fn monitor_drop_in_path(unit_dir: impl AsRef<Path>) -> PathBuf {
    unit_dir
        .as_ref()
        .join(format!("{MONITOR_SERVICE}.d"))
        .join("grubsnap.conf")
}

/// GRUB bootloader tooling.
#[derive(Debug, Default, Clone)]
pub struct Grub<R = SystemRunner>
where
    R: CommandRunner,
{
    runner: R,
}

impl<R> Grub<R>
where
    R: CommandRunner,
{
    /// Construct new GRUB tooling handle.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Check if GRUB's configuration generator is installed.
    pub fn is_available(&self) -> bool {
        self.runner.has_command(GRUB_MKCONFIG)
    }

    /// Regenerate GRUB's configuration into `grub_cfg`.
    ///
    /// # Errors
    ///
    /// - Return [`GrubError::Command`] if generator fails.
    #[instrument(skip(self, grub_cfg), level = "debug")]
    pub fn regenerate(&self, grub_cfg: impl AsRef<Path>) -> Result<()> {
        info!("regenerate {:?}", grub_cfg.as_ref().display());
        self.runner.call(
            GRUB_MKCONFIG,
            [OsStr::new("-o"), grub_cfg.as_ref().as_os_str()],
        )?;

        Ok(())
    }
}

/// GRUB error types.
#[derive(Debug, thiserror::Error)]
pub enum GrubError {
    /// GRUB tooling failed.
    #[error(transparent)]
    Command(#[from] crate::system::CommandError),
}

/// Friendly result alias :3
pub type Result<T, E = GrubError> = std::result::Result<T, E>;
