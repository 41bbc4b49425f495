// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use grubsnap::{
    btrfs::BtrfsCli,
    config::Settings,
    lock::SnapshotLock,
    path::default_config_path,
    prompt::{AssumeYes, TerminalPrompt},
    setup::{Installer, SetupOptions, SetupOutcome},
    snapshot::{create::SnapshotCreator, list_snapshots, retention::Retention, SnapshotName},
    system::SystemRunner,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, process::exit};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LIST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  grubsnap [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config_path = self.config.unwrap_or_else(default_config_path);
        let settings = Settings::load(&config_path)?;

        match self.command {
            Command::Setup(opts) => run_setup(opts, &settings, config_path),
            Command::Create => run_create(&settings),
            Command::Prune(opts) => run_prune(opts, &settings),
            Command::List => run_list(&settings),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Configure snapshot subvolume, units, and GRUB integration.
    #[command(override_usage = "grubsnap setup [options]")]
    Setup(SetupCliOptions),

    /// Take one read-only snapshot now.
    #[command(override_usage = "grubsnap create [options]")]
    Create,

    /// Delete all but the most recent snapshots.
    #[command(override_usage = "grubsnap prune [options]")]
    Prune(PruneOptions),

    /// List snapshots oldest first.
    #[command(override_usage = "grubsnap list [options]")]
    List,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SetupCliOptions {
    /// Answer yes to every confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Do not install missing packages.
    #[arg(long)]
    pub skip_packages: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PruneOptions {
    /// Number of snapshots to keep instead of the configured amount.
    #[arg(short, long, value_name = "count", value_parser = clap::value_parser!(u32).range(1..))]
    pub keep: Option<u32>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_setup(opts: SetupCliOptions, settings: &Settings, config_path: PathBuf) -> Result<()> {
    let exe = env::current_exe().context("cannot locate grubsnap binary")?;
    let options = SetupOptions {
        skip_packages: opts.skip_packages,
    };

    let outcome = if opts.yes {
        Installer::new(settings, SystemRunner::new(), AssumeYes, exe, config_path)
            .with_options(options)
            .run()?
    } else {
        Installer::new(settings, SystemRunner::new(), TerminalPrompt, exe, config_path)
            .with_options(options)
            .run()?
    };

    if let SetupOutcome::Completed(report) = outcome {
        info!(
            "setup complete: {} package(s) installed, {} warning(s)",
            report.installed.len(),
            report.warnings.len()
        );
    }

    Ok(())
}

fn run_create(settings: &Settings) -> Result<()> {
    let lock = SnapshotLock::acquire(
        &settings.snapshot.lock_file,
        settings.snapshot.lock_timeout(),
    )?;
    debug!("holding lock {:?}", lock.path().display());
    let creator = SnapshotCreator::new(settings.snapshot.clone(), BtrfsCli::new(SystemRunner::new()));
    let path = creator.create()?;
    info!("created snapshot {:?}", path.display());

    Ok(())
}

fn run_prune(opts: PruneOptions, settings: &Settings) -> Result<()> {
    let keep = opts
        .keep
        .map(|keep| keep as usize)
        .unwrap_or(settings.snapshot.keep);

    let _lock = SnapshotLock::acquire(
        &settings.snapshot.lock_file,
        settings.snapshot.lock_timeout(),
    )?;
    let retention = Retention::new(settings.snapshot.clone(), BtrfsCli::new(SystemRunner::new()));
    let report = retention.apply(keep)?;

    if !report.is_complete() {
        bail!(
            "deleted only {} of {} snapshots",
            report.deleted.len(),
            report.intended
        );
    }

    Ok(())
}

fn run_list(settings: &Settings) -> Result<()> {
    let snapshots = list_snapshots(&settings.snapshot.directory, &settings.snapshot.prefix)?;
    if snapshots.is_empty() {
        info!(
            "no snapshots in {:?}",
            settings.snapshot.directory.display()
        );
        return Ok(());
    }

    // INVARIANT: Snapshot mtime is inherited from the source, so the time a
    // snapshot was taken comes from its name.
    for snapshot in snapshots {
        let taken = SnapshotName::parse(&settings.snapshot.prefix, &snapshot.name)
            .map(|name| name.timestamp().format(LIST_TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-".repeat(19));
        let modified: DateTime<Local> = snapshot.modified.into();
        println!(
            "{taken}  {}  {}",
            modified.format(LIST_TIME_FORMAT),
            snapshot.name
        );
    }

    Ok(())
}
