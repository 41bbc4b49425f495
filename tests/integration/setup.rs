// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{integration::sandbox_settings, ScriptedPrompt, ScriptedRunner};
use grubsnap::{
    artifact::{FileChange, CREATE_HELPER, PRUNE_HELPER},
    btrfs::BtrfsError,
    config::Settings,
    grub::{monitor_drop_in_path, GRUB_MKCONFIG},
    setup::{
        Installer, SetupError, SetupOptions, SetupOutcome, SetupReport, SnapshotManager,
        SubvolumeState,
    },
    system::CommandOutput,
    timeshift::{TimeshiftConfig, TIMESHIFT},
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    fs::{create_dir_all, metadata, read_to_string, write},
    os::unix::fs::PermissionsExt,
};

const EXE: &str = "/usr/bin/grubsnap";
const CONFIG: &str = "/etc/grubsnap/config.toml";

/// Root on a Btrfs host with GRUB, grub-btrfs, and nothing else special.
fn host() -> ScriptedRunner {
    ScriptedRunner::new()
        .with_command(GRUB_MKCONFIG)
        .reply("id -u", CommandOutput::ok("0\n"))
        .reply("stat --file-system --format=%T", CommandOutput::ok("btrfs\n"))
        .reply("systemctl is-enabled", CommandOutput::failed("disabled\n"))
}

fn run_setup(
    settings: &Settings,
    runner: &ScriptedRunner,
    prompt: &ScriptedPrompt,
) -> Result<SetupOutcome, SetupError> {
    Installer::new(settings, runner, prompt, EXE, CONFIG).run()
}

fn completed(outcome: SetupOutcome) -> SetupReport {
    match outcome {
        SetupOutcome::Completed(report) => report,
        SetupOutcome::Declined => panic!("setup was declined"),
    }
}

#[sealed_test]
fn setup_refuses_non_root_user() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host().reply("id -u", CommandOutput::ok("1000\n"));
    let prompt = ScriptedPrompt::answering([true]);

    match run_setup(&settings, &runner, &prompt) {
        Err(SetupError::NotRoot { uid }) => assert_eq!(uid, "1000"),
        other => panic!("expected root check failure, got {other:?}"),
    }
    assert!(prompt.asked().is_empty());
    assert!(!settings.install.unit_dir.exists());

    Ok(())
}

#[sealed_test]
fn setup_refuses_root_outside_btrfs() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host().reply("stat --file-system --format=%T", CommandOutput::ok("ext2/ext3\n"));
    let prompt = ScriptedPrompt::answering([true]);

    let result = run_setup(&settings, &runner, &prompt);
    assert!(matches!(
        result,
        Err(SetupError::Btrfs(BtrfsError::NotBtrfs { .. }))
    ));
    assert!(!runner.called_starting_with("btrfs subvolume create"));
    assert!(!settings.install.unit_dir.exists());

    Ok(())
}

#[sealed_test]
fn setup_requires_grub() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = ScriptedRunner::new()
        .reply("id -u", CommandOutput::ok("0\n"))
        .reply("stat --file-system --format=%T", CommandOutput::ok("btrfs\n"));
    let prompt = ScriptedPrompt::answering([true]);

    let result = run_setup(&settings, &runner, &prompt);
    assert!(matches!(result, Err(SetupError::MissingBootloader)));
    assert!(prompt.asked().is_empty());

    Ok(())
}

#[sealed_test]
fn setup_declined_changes_nothing() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host();
    let prompt = ScriptedPrompt::answering([false]);

    let outcome = run_setup(&settings, &runner, &prompt)?;
    assert_eq!(outcome, SetupOutcome::Declined);
    assert_eq!(prompt.asked().len(), 1);
    assert!(!runner.called_starting_with("pacman"));
    assert!(!runner.called_starting_with("systemctl"));
    assert!(!settings.install.helper_dir.exists());
    assert!(!settings.install.unit_dir.exists());

    Ok(())
}

#[sealed_test]
fn setup_fresh_host_uses_native_units() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host().reply(
        "pacman -Q grub-btrfs",
        CommandOutput::failed("error: package 'grub-btrfs' was not found\n"),
    );
    let prompt = ScriptedPrompt::answering([true]);

    let report = completed(run_setup(&settings, &runner, &prompt)?);
    let snapshot_dir = settings.snapshot.directory.display().to_string();

    assert_eq!(report.manager, SnapshotManager::Native);
    assert_eq!(report.subvolume, SubvolumeState::Created);
    assert_eq!(report.installed, vec!["grub-btrfs".to_string()]);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.files.len(), 7);
    assert!(report
        .files
        .iter()
        .all(|(_, change)| *change == FileChange::Created));

    for line in [
        "pacman -S --needed --noconfirm grub-btrfs".to_string(),
        format!("btrfs subvolume create {snapshot_dir}"),
        "systemctl daemon-reload".to_string(),
        "systemctl enable grubsnap-create.service".to_string(),
        "systemctl enable --now grubsnap-prune.timer".to_string(),
        "systemctl enable --now grub-btrfsd.service".to_string(),
        "systemctl try-restart grub-btrfsd.service".to_string(),
        format!("grub-mkconfig -o {}", settings.install.grub_cfg.display()),
    ] {
        assert!(runner.called(&line), "missing {line:?} in {:#?}", runner.calls());
    }

    let create_helper = settings.install.helper_dir.join(CREATE_HELPER);
    let prune_helper = settings.install.helper_dir.join(PRUNE_HELPER);
    assert_eq!(metadata(&create_helper)?.permissions().mode() & 0o777, 0o755);
    assert!(read_to_string(&create_helper)?
        .contains("exec '/usr/bin/grubsnap' --config '/etc/grubsnap/config.toml' create \"$@\""));
    assert!(read_to_string(&prune_helper)?.contains(" prune \"$@\""));

    assert_eq!(
        read_to_string(&settings.install.grub_btrfs_config)?,
        format!("GRUB_BTRFS_SNAPSHOT_DIR=\"{snapshot_dir}\"\n")
    );
    assert!(
        read_to_string(monitor_drop_in_path(&settings.install.unit_dir))?
            .contains(&format!("ExecStart=/usr/bin/grub-btrfsd --syslog {snapshot_dir}"))
    );
    assert!(!settings.timeshift.config.exists());

    Ok(())
}

#[sealed_test]
fn setup_rerun_changes_nothing() -> Result<()> {
    let settings = sandbox_settings()?;
    let first = host();
    completed(run_setup(&settings, &first, &ScriptedPrompt::answering([true]))?);

    // Subvolume creation is scripted, so make it real for the second run.
    create_dir_all(&settings.snapshot.directory)?;

    let second = host().reply("systemctl is-enabled", CommandOutput::ok("enabled\n"));
    let report = completed(run_setup(
        &settings,
        &second,
        &ScriptedPrompt::answering([true]),
    )?);

    assert_eq!(report.subvolume, SubvolumeState::Existing);
    assert!(report.installed.is_empty());
    assert!(report
        .files
        .iter()
        .all(|(_, change)| *change == FileChange::Unchanged));
    assert!(!second.called_starting_with("btrfs subvolume create"));
    assert!(!second.called_starting_with("pacman -S"));
    assert!(!second.called("systemctl enable grubsnap-create.service"));
    assert!(!second.called("systemctl enable --now grubsnap-prune.timer"));
    assert!(!second.called_starting_with("systemctl try-restart"));

    Ok(())
}

#[sealed_test]
fn setup_rejects_plain_snapshot_directory() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;
    let runner = host().reply(
        "btrfs subvolume show",
        CommandOutput::failed("ERROR: Not a Btrfs subvolume\n"),
    );

    let result = run_setup(&settings, &runner, &ScriptedPrompt::answering([true]));
    assert!(matches!(result, Err(SetupError::NotSubvolume { .. })));
    assert!(!settings.install.unit_dir.exists());

    Ok(())
}

#[sealed_test]
fn setup_skips_packages_on_request() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host();
    let prompt = ScriptedPrompt::answering([true]);

    let report = completed(
        Installer::new(&settings, &runner, &prompt, EXE, CONFIG)
            .with_options(SetupOptions {
                skip_packages: true,
            })
            .run()?,
    );

    assert!(report.installed.is_empty());
    assert!(!runner.called_starting_with("pacman"));

    Ok(())
}

#[sealed_test]
fn setup_hands_off_to_working_timeshift() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host().with_command(TIMESHIFT);
    let prompt = ScriptedPrompt::answering([true]);

    let report = completed(run_setup(&settings, &runner, &prompt)?);

    assert_eq!(report.manager, SnapshotManager::Timeshift);
    assert!(runner.called("timeshift --list"));
    assert!(!runner.called("systemctl enable grubsnap-create.service"));
    assert!(!runner.called("systemctl enable --now grubsnap-prune.timer"));
    assert!(!runner.called_starting_with("systemctl disable"));
    assert_eq!(
        read_to_string(&settings.timeshift.config)?,
        TimeshiftConfig::default().render()?
    );
    assert!(read_to_string(monitor_drop_in_path(&settings.install.unit_dir))?
        .contains("--timeshift-auto"));

    Ok(())
}

#[sealed_test]
fn setup_switch_to_timeshift_disables_native_units() -> Result<()> {
    let settings = sandbox_settings()?;
    let first = host();
    let report = completed(run_setup(&settings, &first, &ScriptedPrompt::answering([true]))?);
    assert_eq!(report.manager, SnapshotManager::Native);
    assert!(first.called("systemctl enable --now grubsnap-prune.timer"));

    create_dir_all(&settings.snapshot.directory)?;

    // Timeshift got installed after the native units were enabled.
    let second = host()
        .with_command(TIMESHIFT)
        .reply("systemctl is-enabled", CommandOutput::ok("enabled\n"));
    let report = completed(run_setup(
        &settings,
        &second,
        &ScriptedPrompt::answering([true]),
    )?);

    assert_eq!(report.manager, SnapshotManager::Timeshift);
    assert!(second.called("systemctl disable --now grubsnap-create.service"));
    assert!(second.called("systemctl disable --now grubsnap-prune.timer"));
    assert!(!second.called("systemctl enable grubsnap-create.service"));
    assert!(!second.called("systemctl enable --now grubsnap-prune.timer"));

    Ok(())
}

#[sealed_test]
fn setup_falls_back_when_timeshift_hangs() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host().with_command(TIMESHIFT).time_out("timeshift --list");
    let prompt = ScriptedPrompt::answering([true]);

    let report = completed(run_setup(&settings, &runner, &prompt)?);

    assert_eq!(report.manager, SnapshotManager::Native);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("timeshift"));
    assert!(runner.called("systemctl enable grubsnap-create.service"));
    assert!(runner.called("systemctl enable --now grubsnap-prune.timer"));
    assert!(!settings.timeshift.config.exists());

    Ok(())
}

#[sealed_test]
fn setup_keeps_existing_timeshift_config_when_declined() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all("timeshift")?;
    write(&settings.timeshift.config, "{}\n")?;
    let runner = host().with_command(TIMESHIFT);
    let prompt = ScriptedPrompt::answering([true, false]);

    let report = completed(run_setup(&settings, &runner, &prompt)?);

    assert_eq!(report.manager, SnapshotManager::Timeshift);
    assert_eq!(prompt.asked().len(), 2);
    assert_eq!(read_to_string(&settings.timeshift.config)?, "{}\n");
    assert!(report
        .files
        .contains(&(settings.timeshift.config.clone(), FileChange::Unchanged)));

    Ok(())
}

#[sealed_test]
fn setup_tolerates_missing_monitor_daemon() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host().reply(
        "systemctl cat --quiet grub-btrfsd.service",
        CommandOutput::failed("No files found for grub-btrfsd.service.\n"),
    );

    let report = completed(run_setup(&settings, &runner, &ScriptedPrompt::answering([true]))?);

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("grub-btrfsd.service"));
    assert!(!monitor_drop_in_path(&settings.install.unit_dir).exists());
    assert!(!runner.called("systemctl enable --now grub-btrfsd.service"));

    Ok(())
}

#[sealed_test]
fn setup_tolerates_grub_regeneration_failure() -> Result<()> {
    let settings = sandbox_settings()?;
    let runner = host().reply(
        "grub-mkconfig",
        CommandOutput::failed("/usr/bin/grub-probe: error: failed to get canonical path\n"),
    );

    let report = completed(run_setup(&settings, &runner, &ScriptedPrompt::answering([true]))?);

    assert_eq!(report.manager, SnapshotManager::Native);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("grub.cfg"));

    Ok(())
}
