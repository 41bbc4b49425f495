// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! System package management.

use crate::system::{CommandRunner, SystemRunner};

use tracing::{debug, info, instrument};

/// Query and install system packages.
pub trait PackageManager {
    /// Check if `package` is installed.
    fn is_installed(&self, package: &str) -> bool;

    /// Install every package in `packages`.
    fn install(&self, packages: &[String]) -> Result<()>;

    /// Install whichever of `packages` are missing.
    ///
    /// Returns names of packages that were installed.
    fn install_missing(&self, packages: &[String]) -> Result<Vec<String>> {
        let missing = packages
            .iter()
            .filter(|package| !self.is_installed(package))
            .cloned()
            .collect::<Vec<_>>();

        if missing.is_empty() {
            debug!("all packages already installed");
            return Ok(missing);
        }

        info!("install packages: {}", missing.join(" "));
        self.install(&missing)?;

        Ok(missing)
    }
}

/// Package management through pacman.
#[derive(Debug, Default, Clone)]
pub struct Pacman<R = SystemRunner>
where
    R: CommandRunner,
{
    runner: R,
}

impl<R> Pacman<R>
where
    R: CommandRunner,
{
    /// Construct new pacman backed package manager.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R> PackageManager for Pacman<R>
where
    R: CommandRunner,
{
    fn is_installed(&self, package: &str) -> bool {
        self.runner.probe("pacman", ["-Q", package])
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, packages: &[String]) -> Result<()> {
        let mut args = vec!["-S", "--needed", "--noconfirm"];
        args.extend(packages.iter().map(String::as_str));
        self.runner.call("pacman", args)?;

        Ok(())
    }
}

/// Package management error types.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Package manager failed.
    #[error(transparent)]
    Command(#[from] crate::system::CommandError),
}

/// Friendly result alias :3
pub type Result<T, E = PackageError> = std::result::Result<T, E>;
