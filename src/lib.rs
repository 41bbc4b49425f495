// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Btrfs snapshots in the GRUB boot menu.
//!
//! Grubsnap sets up a host so that a read-only snapshot of the root
//! subvolume is taken on every boot, old snapshots are cleaned up daily, and
//! every snapshot shows up as a bootable entry in GRUB through grub-btrfs.
//! When Timeshift is installed and working, snapshot creation and cleanup are
//! handed off to it instead.
//!
//! # See Also
//!
//! 1. [ArchWiki - Btrfs](https://wiki.archlinux.org/title/Btrfs#Snapshots)
//! 2. [`setup`]
//! 3. [`snapshot`]

pub mod artifact;
pub mod btrfs;
pub mod config;
pub mod grub;
pub mod lock;
pub mod packages;
pub mod path;
pub mod prompt;
pub mod setup;
pub mod snapshot;
pub mod system;
pub mod systemd;
pub mod timeshift;
