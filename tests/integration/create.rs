// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{integration::sandbox_settings, DirSubvolumes, ScriptedRunner};
use grubsnap::{
    btrfs::{BtrfsCli, BtrfsError},
    lock::{LockError, SnapshotLock},
    snapshot::{
        create::{CreateError, SnapshotCreator},
        list_snapshots,
        retention::Retention,
    },
    system::CommandOutput,
};

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    fs::{create_dir_all, read_dir},
    thread,
    time::Duration,
};

fn boot_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 1)
        .and_then(|date| date.and_hms_opt(8, 15, 42))
        .unwrap()
}

#[sealed_test]
fn create_names_snapshot_after_timestamp() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;

    let subvolumes = DirSubvolumes::new("btrfs");
    let path = SnapshotCreator::new(settings.snapshot.clone(), &subvolumes).create_at(boot_time())?;

    assert_eq!(
        path,
        settings
            .snapshot
            .directory
            .join("boot_auto_snap_2025-03-01_081542")
    );
    assert!(path.is_dir());
    assert_eq!(subvolumes.synced(), vec![settings.snapshot.directory.clone()]);

    Ok(())
}

#[sealed_test]
fn create_within_same_second_never_overwrites() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;

    let subvolumes = DirSubvolumes::new("btrfs");
    let creator = SnapshotCreator::new(settings.snapshot.clone(), &subvolumes);
    let first = creator.create_at(boot_time())?;
    let second = creator.create_at(boot_time())?;
    let third = creator.create_at(boot_time())?;

    let names: Vec<String> = [first, second, third]
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "boot_auto_snap_2025-03-01_081542",
            "boot_auto_snap_2025-03-01_081542.1",
            "boot_auto_snap_2025-03-01_081542.2",
        ]
    );
    assert_eq!(
        list_snapshots(&settings.snapshot.directory, &settings.snapshot.prefix)?.len(),
        3
    );

    Ok(())
}

#[sealed_test]
fn create_without_directory_fails() -> Result<()> {
    let settings = sandbox_settings()?;
    let subvolumes = DirSubvolumes::new("btrfs");
    let result = SnapshotCreator::new(settings.snapshot.clone(), &subvolumes).create_at(boot_time());

    assert!(matches!(result, Err(CreateError::MissingDirectory { .. })));
    assert!(!settings.snapshot.directory.exists());

    Ok(())
}

#[sealed_test]
fn create_on_other_filesystem_leaves_nothing_behind() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;

    let subvolumes = DirSubvolumes::new("ext2/ext3");
    let result = SnapshotCreator::new(settings.snapshot.clone(), &subvolumes).create_at(boot_time());

    assert!(matches!(
        result,
        Err(CreateError::Btrfs(BtrfsError::NotBtrfs { .. }))
    ));
    assert_eq!(read_dir(&settings.snapshot.directory)?.count(), 0);
    assert!(subvolumes.synced().is_empty());

    Ok(())
}

#[sealed_test]
fn create_checks_both_filesystems_before_snapshotting() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;

    let source = settings.snapshot.source.display().to_string();
    let directory = settings.snapshot.directory.display().to_string();
    let runner = ScriptedRunner::new()
        .reply(
            format!("stat --file-system --format=%T {source}"),
            CommandOutput::ok("btrfs\n"),
        )
        .reply(
            format!("stat --file-system --format=%T {directory}"),
            CommandOutput::ok("tmpfs\n"),
        );
    let result =
        SnapshotCreator::new(settings.snapshot.clone(), BtrfsCli::new(&runner)).create_at(boot_time());

    match result {
        Err(CreateError::Btrfs(BtrfsError::NotBtrfs { found, .. })) => assert_eq!(found, "tmpfs"),
        other => panic!("expected filesystem mismatch, got {other:?}"),
    }
    assert!(!runner.called_starting_with("btrfs subvolume snapshot"));

    Ok(())
}

#[sealed_test]
fn create_runs_readonly_snapshot_then_sync() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;

    let runner = ScriptedRunner::new().reply("stat --file-system --format=%T", CommandOutput::ok("btrfs\n"));
    let path =
        SnapshotCreator::new(settings.snapshot.clone(), BtrfsCli::new(&runner)).create_at(boot_time())?;

    let source = settings.snapshot.source.display();
    let directory = settings.snapshot.directory.display();
    assert_eq!(
        runner.calls(),
        vec![
            format!("stat --file-system --format=%T {source}"),
            format!("stat --file-system --format=%T {directory}"),
            format!("btrfs subvolume snapshot -r {source} {}", path.display()),
            format!("btrfs filesystem sync {directory}"),
        ]
    );

    Ok(())
}

#[sealed_test]
fn create_and_prune_cycle_keeps_newest() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;

    let subvolumes = DirSubvolumes::new("btrfs");
    let creator = SnapshotCreator::new(settings.snapshot.clone(), &subvolumes);
    let mut created = Vec::new();
    for _ in 0..4 {
        let _lock = SnapshotLock::acquire(&settings.snapshot.lock_file, Duration::ZERO)?;
        created.push(creator.create_at(boot_time())?);
    }

    let _lock = SnapshotLock::acquire(&settings.snapshot.lock_file, Duration::ZERO)?;
    let concurrent = SnapshotLock::acquire(&settings.snapshot.lock_file, Duration::ZERO);
    assert!(matches!(concurrent, Err(LockError::Busy { .. })));

    let report = Retention::new(settings.snapshot.clone(), &subvolumes).apply(2)?;
    assert_eq!(report.intended, 2);

    let remaining: Vec<_> = list_snapshots(&settings.snapshot.directory, &settings.snapshot.prefix)?
        .into_iter()
        .map(|snapshot| snapshot.path)
        .collect();
    assert_eq!(remaining.len(), 2);
    for path in &remaining {
        assert!(created.contains(path));
    }

    Ok(())
}

#[sealed_test]
fn create_waits_for_running_prune() -> Result<()> {
    let settings = sandbox_settings()?;
    create_dir_all(&settings.snapshot.directory)?;

    // Cleanup timer caught up at boot and holds the lock for a while.
    let pruning = SnapshotLock::acquire(&settings.snapshot.lock_file, Duration::ZERO)?;
    let prune = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        drop(pruning);
    });

    let timeout = settings.snapshot.lock_timeout();
    let _lock = SnapshotLock::acquire(&settings.snapshot.lock_file, timeout)?;
    let subvolumes = DirSubvolumes::new("btrfs");
    let path = SnapshotCreator::new(settings.snapshot.clone(), &subvolumes).create_at(boot_time())?;

    assert!(path.is_dir());
    prune
        .join()
        .map_err(|_| anyhow::anyhow!("prune thread panicked"))?;

    Ok(())
}
