// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Service manager integration.
//!
//! Queries about units are answered as typed values from exit statuses, so
//! no caller ever inspects the free text that `systemctl` prints.

use crate::system::{CommandRunner, SystemRunner};

use tracing::{debug, instrument};

/// Control over the init system's units.
pub trait ServiceManager {
    /// Check if a unit with name `unit` is known to the service manager.
    fn unit_exists(&self, unit: &str) -> bool;

    /// Check if `unit` is enabled.
    fn is_enabled(&self, unit: &str) -> bool;

    /// Reload unit files from disk.
    fn daemon_reload(&self) -> Result<()>;

    /// Enable `unit`, starting it right away when `now` is set.
    fn enable(&self, unit: &str, now: bool) -> Result<()>;

    /// Disable `unit`, stopping it right away when `now` is set.
    fn disable(&self, unit: &str, now: bool) -> Result<()>;

    /// Restart `unit` if it is running.
    fn try_restart(&self, unit: &str) -> Result<()>;
}

/// Service manager through `systemctl`.
#[derive(Debug, Default, Clone)]
pub struct Systemctl<R = SystemRunner>
where
    R: CommandRunner,
{
    runner: R,
}

impl<R> Systemctl<R>
where
    R: CommandRunner,
{
    /// Construct new `systemctl` backed service manager.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R> ServiceManager for Systemctl<R>
where
    R: CommandRunner,
{
    fn unit_exists(&self, unit: &str) -> bool {
        let exists = self.runner.probe("systemctl", ["cat", "--quiet", unit]);
        debug!("unit {unit:?} exists: {exists}");
        exists
    }

    fn is_enabled(&self, unit: &str) -> bool {
        self.runner
            .probe("systemctl", ["is-enabled", "--quiet", unit])
    }

    #[instrument(skip(self), level = "debug")]
    fn daemon_reload(&self) -> Result<()> {
        self.runner.call("systemctl", ["daemon-reload"])?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn enable(&self, unit: &str, now: bool) -> Result<()> {
        if now {
            self.runner.call("systemctl", ["enable", "--now", unit])?;
        } else {
            self.runner.call("systemctl", ["enable", unit])?;
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn disable(&self, unit: &str, now: bool) -> Result<()> {
        if now {
            self.runner.call("systemctl", ["disable", "--now", unit])?;
        } else {
            self.runner.call("systemctl", ["disable", unit])?;
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn try_restart(&self, unit: &str) -> Result<()> {
        self.runner.call("systemctl", ["try-restart", unit])?;
        Ok(())
    }
}

/// Service manager error types.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// `systemctl` failed.
    #[error(transparent)]
    Command(#[from] crate::system::CommandError),
}

/// Friendly result alias :3
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
