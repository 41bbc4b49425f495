// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Optional handoff to Timeshift.
//!
//! When Timeshift is installed and working, it takes over snapshot creation
//! and retention, and grubsnap only configures it. Timeshift stores every
//! value in its JSON configuration as a string, so booleans and counts are
//! rendered that way here too.

use crate::system::{CommandLine, CommandRunner, SystemRunner};

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, instrument};

/// Timeshift's program name.
pub const TIMESHIFT: &str = "timeshift";

/// Paths Timeshift never includes in a snapshot.
pub const EXCLUDES: &[&str] = &[
    "/home/**",
    "/root/**",
    "/var/cache/pacman/pkg/**",
    "/var/log/journal/**",
    "/var/tmp/**",
];

/// One scheduling tier of Timeshift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    /// Whether snapshots are taken on this schedule.
    pub enabled: bool,

    /// How many snapshots of this tier are kept.
    pub count: u32,
}

impl Tier {
    const fn new(enabled: bool, count: u32) -> Self {
        Self { enabled, count }
    }
}

/// Timeshift configuration written by grubsnap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeshiftConfig {
    pub monthly: Tier,
    pub weekly: Tier,
    pub daily: Tier,
    pub hourly: Tier,
    pub boot: Tier,
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        Self {
            monthly: Tier::new(false, 2),
            weekly: Tier::new(false, 3),
            daily: Tier::new(true, 5),
            hourly: Tier::new(false, 6),
            boot: Tier::new(true, 5),
        }
    }
}

impl TimeshiftConfig {
    /// Render configuration as Timeshift's JSON layout.
    pub fn to_json(&self) -> Value {
        json!({
            "btrfs_mode": "true",
            "include_btrfs_home_for_backup": "false",
            "stop_cron_emails": "true",
            "schedule_monthly": self.monthly.enabled.to_string(),
            "schedule_weekly": self.weekly.enabled.to_string(),
            "schedule_daily": self.daily.enabled.to_string(),
            "schedule_hourly": self.hourly.enabled.to_string(),
            "schedule_boot": self.boot.enabled.to_string(),
            "count_monthly": self.monthly.count.to_string(),
            "count_weekly": self.weekly.count.to_string(),
            "count_daily": self.daily.count.to_string(),
            "count_hourly": self.hourly.count.to_string(),
            "count_boot": self.boot.count.to_string(),
            "exclude": EXCLUDES,
        })
    }

    /// Render configuration as pretty printed JSON text.
    ///
    /// # Errors
    ///
    /// - Return [`TimeshiftError::Serialize`] if JSON cannot be produced.
    pub fn render(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(&self.to_json())?;
        text.push('\n');
        Ok(text)
    }
}

/// Timeshift tooling.
#[derive(Debug, Default, Clone)]
pub struct Timeshift<R = SystemRunner>
where
    R: CommandRunner,
{
    runner: R,
}

impl<R> Timeshift<R>
where
    R: CommandRunner,
{
    /// Construct new Timeshift handle.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Check if Timeshift is installed.
    pub fn is_installed(&self) -> bool {
        self.runner.has_command(TIMESHIFT)
    }

    /// Check that Timeshift actually works by listing its snapshots.
    ///
    /// # Errors
    ///
    /// - Return [`TimeshiftError::Command`] if listing fails or does not
    ///   finish within `timeout`.
    #[instrument(skip(self), level = "debug")]
    pub fn verify(&self, timeout: Duration) -> Result<()> {
        info!("verify that timeshift works");
        let command = CommandLine::new(TIMESHIFT, ["--list"]);
        self.runner
            .output_with_timeout(&command, timeout)?
            .into_result(command)?;

        Ok(())
    }
}

/// Timeshift error types.
#[derive(Debug, thiserror::Error)]
pub enum TimeshiftError {
    /// Timeshift failed or hung.
    #[error(transparent)]
    Command(#[from] crate::system::CommandError),

    /// Configuration cannot be rendered.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Friendly result alias :3
pub type Result<T, E = TimeshiftError> = std::result::Result<T, E>;
