// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations for every external file that grubsnap either
//! reads, generates, or manages in some way. All of these can be overridden
//! through the configuration file, so nothing here checks if the path
//! returned actually exists.

use std::path::PathBuf;

/// Default absolute path to grubsnap's configuration file.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/grubsnap/config.toml")
}

/// Default source subvolume to take snapshots of.
pub fn default_snapshot_source() -> PathBuf {
    PathBuf::from("/")
}

/// Default location of the dedicated snapshot subvolume.
pub fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("/.snapshots")
}

/// Default lock file guarding snapshot creation and cleanup.
///
/// Lives under `/run` so a stale file never survives a reboot.
pub fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/grubsnap.lock")
}

/// Default directory for generated helper scripts.
pub fn default_helper_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

/// Default directory for generated systemd unit files.
pub fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

/// Default output path of `grub-mkconfig`.
pub fn default_grub_cfg() -> PathBuf {
    PathBuf::from("/boot/grub/grub.cfg")
}

/// Default configuration file of grub-btrfs.
///
/// # See Also
///
/// - [grub-btrfs](https://github.com/Antynea/grub-btrfs)
pub fn default_grub_btrfs_config() -> PathBuf {
    PathBuf::from("/etc/default/grub-btrfs/config")
}

/// Default configuration file of Timeshift.
pub fn default_timeshift_config() -> PathBuf {
    PathBuf::from("/etc/timeshift/timeshift.json")
}
