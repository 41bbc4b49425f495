// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Generated artifacts.
//!
//! Setup writes two kinds of files: helper scripts that the units execute,
//! and the units themselves. Helper scripts are thin wrappers that hand
//! control back to the grubsnap binary, so snapshot creation and retention
//! always run the same code no matter who triggers them.
//!
//! # Idempotence
//!
//! Every artifact is written through [`write_if_changed`]. Files that already
//! hold the expected content are left alone, which makes re-running setup
//! after an interruption safe.

use crate::config::Settings;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read, set_permissions, write, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Unit taking one snapshot per boot.
pub const CREATE_SERVICE: &str = "grubsnap-create.service";

/// Unit applying the retention policy.
pub const PRUNE_SERVICE: &str = "grubsnap-prune.service";

/// Timer triggering [`PRUNE_SERVICE`] once a day.
pub const PRUNE_TIMER: &str = "grubsnap-prune.timer";

/// Helper script that takes a snapshot.
pub const CREATE_HELPER: &str = "grubsnap-create-snapshot";

/// Helper script that applies the retention policy.
pub const PRUNE_HELPER: &str = "grubsnap-prune-snapshots";

const GENERATED_NOTICE: &str = "Generated by grubsnap, changes are overwritten by `grubsnap setup`.";

/// What happened to a file written by [`write_if_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Created,
    Updated,
    Unchanged,
}

/// Write `contents` to `path` unless it already holds exactly that.
///
/// Creates parent directories as needed. Applies `mode` to the file when
/// given, even if its contents were already up to date.
///
/// # Errors
///
/// - Return [`ArtifactError::Write`] if directories or file cannot be
///   written.
pub fn write_if_changed(
    path: impl AsRef<Path>,
    contents: impl AsRef<[u8]>,
    mode: Option<u32>,
) -> Result<FileChange> {
    let path = path.as_ref();
    let contents = contents.as_ref();
    let write_error = |err: std::io::Error| ArtifactError::Write {
        source: err,
        path: path.to_path_buf(),
    };

    let change = match read(path) {
        Ok(current) if current == contents => FileChange::Unchanged,
        Ok(_) => FileChange::Updated,
        Err(_) => FileChange::Created,
    };

    if change != FileChange::Unchanged {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(write_error)?;
        }
        write(path, contents).map_err(write_error)?;
    }

    if let Some(mode) = mode {
        set_permissions(path, Permissions::from_mode(mode)).map_err(write_error)?;
    }

    match change {
        FileChange::Unchanged => debug!("{:?} is up to date", path.display()),
        FileChange::Created => info!("created {:?}", path.display()),
        FileChange::Updated => info!("updated {:?}", path.display()),
    }

    Ok(change)
}

/// Shell script that executes one grubsnap subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperScript {
    exe: PathBuf,
    config: PathBuf,
    subcommand: String,
}

impl HelperScript {
    /// Construct new helper script running `exe --config <config> <subcommand>`.
    pub fn new(
        exe: impl Into<PathBuf>,
        config: impl Into<PathBuf>,
        subcommand: impl Into<String>,
    ) -> Self {
        Self {
            exe: exe.into(),
            config: config.into(),
            subcommand: subcommand.into(),
        }
    }
}

impl Display for HelperScript {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "#!/bin/sh")?;
        writeln!(fmt, "# {GENERATED_NOTICE}")?;
        writeln!(
            fmt,
            "exec {} --config {} {} \"$@\"",
            shell_quote(&self.exe.to_string_lossy()),
            shell_quote(&self.config.to_string_lossy()),
            self.subcommand
        )
    }
}

// INVARIANT: Single quotes cannot be escaped inside single quotes, so close,
// emit an escaped quote, and reopen.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Systemd unit file.
///
/// Sections and their entries are rendered in insertion order. Duplicate
/// keys are allowed, which systemd needs to reset list settings, e.g., an
/// empty `ExecStart=` in a drop-in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnitFile {
    sections: Vec<UnitSection>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct UnitSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl UnitFile {
    /// Construct new empty unit file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start new section named `name`.
    pub fn section(mut self, name: impl Into<String>) -> Self {
        self.sections.push(UnitSection {
            name: name.into(),
            entries: Vec::new(),
        });
        self
    }

    /// Add `key=value` to the most recent section.
    ///
    /// # Panics
    ///
    /// - Will panic if no section was started yet.
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let section = self
            .sections
            .last_mut()
            .expect("unit entry added before any section");
        section.entries.push((key.into(), value.into()));
        self
    }
}

impl Display for UnitFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "# {GENERATED_NOTICE}")?;
        for section in &self.sections {
            writeln!(fmt)?;
            writeln!(fmt, "[{}]", section.name)?;
            for (key, value) in &section.entries {
                writeln!(fmt, "{key}={value}")?;
            }
        }

        Ok(())
    }
}

/// Every helper script and unit setup installs.
#[derive(Debug, Clone)]
pub struct Artifacts<'a> {
    settings: &'a Settings,
    exe: PathBuf,
    config: PathBuf,
}

impl<'a> Artifacts<'a> {
    /// Construct artifact set for grubsnap binary at `exe` reading its
    /// configuration from `config`.
    pub fn new(settings: &'a Settings, exe: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            exe: exe.into(),
            config: config.into(),
        }
    }

    fn helper_path(&self, name: &str) -> PathBuf {
        self.settings.install.helper_dir.join(name)
    }

    /// Helper scripts paired with their install paths.
    pub fn helper_scripts(&self) -> Vec<(PathBuf, HelperScript)> {
        vec![
            (
                self.helper_path(CREATE_HELPER),
                HelperScript::new(&self.exe, &self.config, "create"),
            ),
            (
                self.helper_path(PRUNE_HELPER),
                HelperScript::new(&self.exe, &self.config, "prune"),
            ),
        ]
    }

    /// Units paired with their install paths.
    pub fn units(&self) -> Vec<(PathBuf, UnitFile)> {
        let unit_dir = &self.settings.install.unit_dir;
        let snapshot_dir = self.settings.snapshot.directory.display().to_string();

        let create = UnitFile::new()
            .section("Unit")
            .entry("Description", "Take Btrfs snapshot at boot")
            .entry("After", "local-fs.target")
            .entry("RequiresMountsFor", snapshot_dir.as_str())
            .section("Service")
            .entry("Type", "oneshot")
            .entry(
                "ExecStart",
                self.helper_path(CREATE_HELPER).display().to_string(),
            )
            .section("Install")
            .entry("WantedBy", "multi-user.target");

        let prune = UnitFile::new()
            .section("Unit")
            .entry("Description", "Delete old Btrfs snapshots")
            .entry("RequiresMountsFor", snapshot_dir.as_str())
            .section("Service")
            .entry("Type", "oneshot")
            .entry(
                "ExecStart",
                self.helper_path(PRUNE_HELPER).display().to_string(),
            );

        let timer = UnitFile::new()
            .section("Unit")
            .entry("Description", "Delete old Btrfs snapshots daily")
            .section("Timer")
            .entry("OnCalendar", "daily")
            .entry("Persistent", "true")
            .entry("Unit", PRUNE_SERVICE)
            .section("Install")
            .entry("WantedBy", "timers.target");

        vec![
            (unit_dir.join(CREATE_SERVICE), create),
            (unit_dir.join(PRUNE_SERVICE), prune),
            (unit_dir.join(PRUNE_TIMER), timer),
        ]
    }
}

/// Artifact error types.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Artifact cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ArtifactError> = std::result::Result<T, E>;
