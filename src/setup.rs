// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host setup.
//!
//! Bring a host from nothing to snapshots in the boot menu. Setup runs as a
//! straight sequence of steps. Each step checks whether its target state
//! already exists before changing anything, so an interrupted setup is fixed
//! by simply running it again. There is no rollback.
//!
//! # Failure Classes
//!
//! Missing privileges, a root filesystem that is not Btrfs, or missing GRUB
//! tooling abort setup before anything is touched. Failures in package
//! installation, subvolume creation, artifact generation, or unit enablement
//! abort at that step. Monitoring daemon discovery and GRUB regeneration are
//! merely nice to have, so their failures only produce warnings.
//!
//! # Snapshot Manager Handoff
//!
//! If Timeshift is installed and answers within its time limit, it takes
//! over snapshot creation and retention. Otherwise grubsnap's own units do
//! the job. Never both, which would snapshot every boot twice. Handing off
//! to Timeshift therefore disables native units an earlier setup enabled.

use crate::{
    artifact::{write_if_changed, Artifacts, FileChange, CREATE_SERVICE, PRUNE_TIMER},
    btrfs::{BtrfsCli, Subvolumes},
    config::Settings,
    grub::{
        monitor_drop_in, monitor_drop_in_path, Grub, GrubBtrfsConfig, MonitorTarget,
        MONITOR_SERVICE,
    },
    packages::{PackageManager, Pacman},
    prompt::Confirm,
    system::CommandRunner,
    systemd::{ServiceManager, Systemctl},
    timeshift::{Timeshift, TimeshiftConfig},
};

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::PathBuf,
    time::Duration,
};
use tracing::{info, instrument, warn};

const SCRIPT_MODE: u32 = 0o755;
const CONFIG_MODE: u32 = 0o644;

/// Which snapshot manager ended up in charge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotManager {
    /// grubsnap's own creation unit and cleanup timer.
    #[default]
    Native,

    /// Timeshift.
    Timeshift,
}

impl Display for SnapshotManager {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Native => fmt.write_str("grubsnap"),
            Self::Timeshift => fmt.write_str("timeshift"),
        }
    }
}

/// State of the snapshot subvolume after setup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SubvolumeState {
    #[default]
    Existing,
    Created,
}

/// What setup did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetupReport {
    /// Packages that had to be installed.
    pub installed: Vec<String>,

    /// Whether the snapshot subvolume had to be created.
    pub subvolume: SubvolumeState,

    /// Every file setup wrote or checked, with what happened to it.
    pub files: Vec<(PathBuf, FileChange)>,

    /// Snapshot manager in charge.
    pub manager: SnapshotManager,

    /// Non-critical steps that failed.
    pub warnings: Vec<String>,
}

/// How setup ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// User declined to continue. Nothing was changed.
    Declined,

    /// Every critical step succeeded.
    Completed(SetupReport),
}

/// Optional setup behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetupOptions {
    /// Do not query or install packages.
    pub skip_packages: bool,
}

/// Performs host setup.
#[derive(Debug)]
pub struct Installer<'a, R, C>
where
    R: CommandRunner,
    C: Confirm,
{
    settings: &'a Settings,
    runner: R,
    prompt: C,
    exe: PathBuf,
    config_path: PathBuf,
    options: SetupOptions,
}

impl<'a, R, C> Installer<'a, R, C>
where
    R: CommandRunner,
    C: Confirm,
{
    /// Construct new installer.
    ///
    /// Generated helper scripts will run the grubsnap binary at `exe` with
    /// the configuration file at `config_path`.
    pub fn new(
        settings: &'a Settings,
        runner: R,
        prompt: C,
        exe: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            runner,
            prompt,
            exe: exe.into(),
            config_path: config_path.into(),
            options: SetupOptions::default(),
        }
    }

    /// Use `options` for this run.
    pub fn with_options(mut self, options: SetupOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every setup step in order.
    ///
    /// # Errors
    ///
    /// - Return [`SetupError::NotRoot`] if not running as root.
    /// - Return [`SetupError::Btrfs`] if source is not on Btrfs, or the
    ///   snapshot subvolume cannot be created.
    /// - Return [`SetupError::MissingBootloader`] if GRUB tooling is absent.
    /// - Return [`SetupError::NotSubvolume`] if snapshot directory exists as
    ///   a plain directory.
    /// - Return other [`SetupError`] variants if a critical step fails.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self) -> Result<SetupOutcome> {
        self.check_preconditions()?;

        let question = format!(
            "Configure snapshots of {:?} in {:?} with GRUB boot menu entries?",
            self.settings.snapshot.source.display(),
            self.settings.snapshot.directory.display()
        );
        if !self.prompt.confirm(&question, true)? {
            info!("setup declined, nothing changed");
            return Ok(SetupOutcome::Declined);
        }

        let mut report = SetupReport::default();
        self.install_packages(&mut report)?;
        self.ensure_subvolume(&mut report)?;
        self.write_artifacts(&mut report)?;
        self.hand_off(&mut report)?;
        self.configure_monitor(&mut report);
        self.regenerate_grub(&mut report);

        info!("snapshots are managed by {}", report.manager);
        if !report.warnings.is_empty() {
            warn!(
                "setup finished with {} warning(s), see above",
                report.warnings.len()
            );
        }

        Ok(SetupOutcome::Completed(report))
    }

    #[instrument(skip(self), level = "debug")]
    fn check_preconditions(&self) -> Result<()> {
        let uid = self.runner.call("id", ["-u"])?;
        let uid = uid.trim();
        if uid != "0" {
            return Err(SetupError::NotRoot { uid: uid.into() });
        }

        BtrfsCli::new(&self.runner).require_btrfs(&self.settings.snapshot.source)?;

        if !Grub::new(&self.runner).is_available() {
            return Err(SetupError::MissingBootloader);
        }

        Ok(())
    }

    fn install_packages(&self, report: &mut SetupReport) -> Result<()> {
        if self.options.skip_packages {
            info!("skip package installation");
            return Ok(());
        }

        let bar = spinner("check packages")?;
        let result = Pacman::new(&self.runner).install_missing(&self.settings.install.packages);
        bar.finish_and_clear();
        report.installed = result?;

        Ok(())
    }

    fn ensure_subvolume(&self, report: &mut SetupReport) -> Result<()> {
        let btrfs = BtrfsCli::new(&self.runner);
        let directory = &self.settings.snapshot.directory;

        if directory.symlink_metadata().is_ok() {
            if !btrfs.is_subvolume(directory) {
                return Err(SetupError::NotSubvolume {
                    path: directory.clone(),
                });
            }

            info!("snapshot subvolume {:?} already exists", directory.display());
            report.subvolume = SubvolumeState::Existing;
            return Ok(());
        }

        info!("create snapshot subvolume {:?}", directory.display());
        btrfs.create_subvolume(directory)?;
        report.subvolume = SubvolumeState::Created;

        Ok(())
    }

    fn write_artifacts(&self, report: &mut SetupReport) -> Result<()> {
        let artifacts = Artifacts::new(self.settings, &self.exe, &self.config_path);

        for (path, script) in artifacts.helper_scripts() {
            let change = write_if_changed(&path, script.to_string(), Some(SCRIPT_MODE))?;
            report.files.push((path, change));
        }

        for (path, unit) in artifacts.units() {
            let change = write_if_changed(&path, unit.to_string(), Some(CONFIG_MODE))?;
            report.files.push((path, change));
        }

        let path = self.settings.install.grub_btrfs_config.clone();
        let config = GrubBtrfsConfig::new(&self.settings.snapshot.directory);
        let change = write_if_changed(&path, config.to_string(), Some(CONFIG_MODE))?;
        report.files.push((path, change));

        Ok(())
    }

    fn hand_off(&self, report: &mut SetupReport) -> Result<()> {
        let timeshift = Timeshift::new(&self.runner);
        if timeshift.is_installed() {
            match timeshift.verify(self.settings.timeshift.verify_timeout()) {
                Ok(()) => {
                    self.configure_timeshift(report)?;
                    self.retire_native_units()?;
                    report.manager = SnapshotManager::Timeshift;
                    return Ok(());
                }
                Err(error) => {
                    let message =
                        format!("timeshift is installed but does not work, using grubsnap units: {error}");
                    warn!("{message}");
                    report.warnings.push(message);
                }
            }
        } else {
            info!("timeshift not installed, using grubsnap units");
        }

        let systemd = Systemctl::new(&self.runner);
        systemd.daemon_reload()?;
        for (unit, now) in [(CREATE_SERVICE, false), (PRUNE_TIMER, true)] {
            if systemd.is_enabled(unit) {
                info!("{unit} already enabled");
                continue;
            }
            systemd.enable(unit, now)?;
        }
        report.manager = SnapshotManager::Native;

        Ok(())
    }

    // INVARIANT: Native units left over from an earlier setup must not run
    // next to Timeshift.
    fn retire_native_units(&self) -> Result<()> {
        let systemd = Systemctl::new(&self.runner);
        for unit in [CREATE_SERVICE, PRUNE_TIMER] {
            if systemd.is_enabled(unit) {
                info!("disable {unit}, timeshift takes over");
                systemd.disable(unit, true)?;
            }
        }

        Ok(())
    }

    fn configure_timeshift(&self, report: &mut SetupReport) -> Result<()> {
        let path = &self.settings.timeshift.config;
        let contents = TimeshiftConfig::default().render()?;

        if let Ok(current) = read_to_string(path) {
            if current != contents {
                let question = format!(
                    "Replace existing Timeshift configuration at {:?}?",
                    path.display()
                );
                if !self.prompt.confirm(&question, false)? {
                    info!("keep existing timeshift configuration");
                    report.files.push((path.clone(), FileChange::Unchanged));
                    return Ok(());
                }
            }
        }

        let change = write_if_changed(path, contents, Some(CONFIG_MODE))?;
        report.files.push((path.clone(), change));

        Ok(())
    }

    fn configure_monitor(&self, report: &mut SetupReport) {
        let systemd = Systemctl::new(&self.runner);
        if !systemd.unit_exists(MONITOR_SERVICE) {
            let message =
                format!("{MONITOR_SERVICE} not found, boot menu only refreshes on GRUB regeneration");
            warn!("{message}");
            report.warnings.push(message);
            return;
        }

        let target = match report.manager {
            SnapshotManager::Native => {
                MonitorTarget::Directory(self.settings.snapshot.directory.clone())
            }
            SnapshotManager::Timeshift => MonitorTarget::Timeshift,
        };
        let path = monitor_drop_in_path(&self.settings.install.unit_dir);

        let result = write_if_changed(&path, monitor_drop_in(&target).to_string(), Some(CONFIG_MODE))
            .map_err(SetupError::from)
            .and_then(|change| {
                report.files.push((path.clone(), change));
                systemd.daemon_reload()?;
                systemd.enable(MONITOR_SERVICE, true)?;
                if change != FileChange::Unchanged {
                    systemd.try_restart(MONITOR_SERVICE)?;
                }
                Ok(())
            });

        if let Err(error) = result {
            let message = format!("failed to configure {MONITOR_SERVICE}: {error}");
            warn!("{message}");
            report.warnings.push(message);
        }
    }

    fn regenerate_grub(&self, report: &mut SetupReport) {
        let grub_cfg = &self.settings.install.grub_cfg;
        let bar = spinner("regenerate GRUB configuration").ok();
        let result = Grub::new(&self.runner).regenerate(grub_cfg);
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        if let Err(error) = result {
            let message = format!("failed to regenerate {:?}: {error}", grub_cfg.display());
            warn!("{message}");
            report.warnings.push(message);
        }
    }
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template("{spinner:.green} {elapsed_precise:.green}  {msg}")?;
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));

    Ok(bar)
}

/// Setup error types.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Not running with root privileges.
    #[error("setup must run as root, running as uid {uid}")]
    NotRoot { uid: String },

    /// GRUB tooling is absent.
    #[error("GRUB is not installed, grub-mkconfig was not found")]
    MissingBootloader,

    /// Snapshot directory exists but is not a subvolume.
    #[error("{:?} exists but is not a btrfs subvolume", path.display())]
    NotSubvolume { path: PathBuf },

    #[error(transparent)]
    Command(#[from] crate::system::CommandError),

    #[error(transparent)]
    Btrfs(#[from] crate::btrfs::BtrfsError),

    #[error(transparent)]
    Package(#[from] crate::packages::PackageError),

    #[error(transparent)]
    Service(#[from] crate::systemd::ServiceError),

    #[error(transparent)]
    Artifact(#[from] crate::artifact::ArtifactError),

    #[error(transparent)]
    Timeshift(#[from] crate::timeshift::TimeshiftError),

    #[error(transparent)]
    Prompt(#[from] crate::prompt::PromptError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = SetupError> = std::result::Result<T, E>;
