// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Everything grubsnap does to the host, e.g., installing packages, creating
//! subvolumes, enabling units, regenerating GRUB, goes through an external
//! program. The [`CommandRunner`] trait is the single seam for all of it, so
//! the rest of the crate can be exercised against a scripted runner instead
//! of a live system.

use std::{
    env,
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    io::ErrorKind,
    os::unix::fs::PermissionsExt,
    path::Path,
    process::{Command, Output},
    time::Duration,
};
use tracing::{debug, instrument};

/// Captured result of one external command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status zero.
    pub success: bool,

    /// Standard output, lossily decoded.
    pub stdout: String,

    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with given stderr.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Merge stdout and stderr into one message.
    pub fn message(&self) -> String {
        let mut message = String::new();

        if !self.stdout.is_empty() {
            message.push_str(format!("stdout: {}", self.stdout).as_str());
        }

        if !self.stderr.is_empty() {
            if !message.is_empty() && !message.ends_with('\n') {
                message.push('\n');
            }
            message.push_str(format!("stderr: {}", self.stderr).as_str());
        }

        // INVARIANT: Chomp trailing newlines.
        message
            .strip_suffix("\r\n")
            .or(message.strip_suffix('\n'))
            .map(ToString::to_string)
            .unwrap_or(message)
    }

    /// Turn unsuccessful output into [`CommandError::Failed`].
    pub fn into_result(self, command: CommandLine) -> Result<String> {
        if !self.success {
            return Err(CommandError::Failed {
                command,
                message: self.message(),
            });
        }

        Ok(self.stdout)
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
        }
    }
}

/// Program name plus arguments, kept for logs and error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<OsString>,
}

impl CommandLine {
    /// Construct new command line.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args
                .into_iter()
                .map(|arg| arg.as_ref().to_os_string())
                .collect(),
        }
    }
}

impl Display for CommandLine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{:?}", self.program)?;
        for arg in &self.args {
            write!(fmt, " {:?}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// Run external programs.
pub trait CommandRunner {
    /// Run program to completion and capture its output.
    ///
    /// A non-zero exit status is not an error here; it is reported through
    /// [`CommandOutput::success`].
    fn output(&self, command: &CommandLine) -> Result<CommandOutput>;

    /// Run program like [`CommandRunner::output`], but give up after
    /// `timeout` has elapsed.
    fn output_with_timeout(&self, command: &CommandLine, timeout: Duration)
        -> Result<CommandOutput>;

    /// Check if program can be found on `PATH`.
    fn has_command(&self, program: &str) -> bool;

    /// Run program and require it to succeed.
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::Failed`] if program exits non-zero.
    fn call(
        &self,
        program: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<String> {
        let command = CommandLine::new(program, args);
        self.output(&command)?.into_result(command)
    }

    /// Run program and only report whether it succeeded.
    fn probe(&self, program: &str, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> bool {
        self.output(&CommandLine::new(program, args))
            .map(|output| output.success)
            .unwrap_or(false)
    }
}

impl<R> CommandRunner for &R
where
    R: CommandRunner,
{
    fn output(&self, command: &CommandLine) -> Result<CommandOutput> {
        (**self).output(command)
    }

    fn output_with_timeout(
        &self,
        command: &CommandLine,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        (**self).output_with_timeout(command, timeout)
    }

    fn has_command(&self, program: &str) -> bool {
        (**self).has_command(program)
    }
}

/// Runner that executes programs on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Construct new host command runner.
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(command = %command), level = "debug")]
    fn output(&self, command: &CommandLine) -> Result<CommandOutput> {
        debug!("run {command}");
        let output = Command::new(&command.program)
            .args(&command.args)
            .output()
            .map_err(|err| spawn_error(command, err))?;

        Ok(output.into())
    }

    #[instrument(skip_all, fields(command = %command), level = "debug")]
    fn output_with_timeout(
        &self,
        command: &CommandLine,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!("run {command} with {timeout:?} limit");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(CommandError::Runtime)?;

        runtime.block_on(async {
            let child = tokio::process::Command::new(&command.program)
                .args(&command.args)
                .kill_on_drop(true)
                .output();

            match tokio::time::timeout(timeout, child).await {
                Ok(output) => output
                    .map(CommandOutput::from)
                    .map_err(|err| spawn_error(command, err)),
                Err(_) => Err(CommandError::TimedOut {
                    command: command.clone(),
                    timeout,
                }),
            }
        })
    }

    fn has_command(&self, program: &str) -> bool {
        let Some(paths) = env::var_os("PATH") else {
            return false;
        };

        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .any(|candidate| is_executable(&candidate))
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn spawn_error(command: &CommandLine, err: std::io::Error) -> CommandError {
    if err.kind() == ErrorKind::NotFound {
        return CommandError::NotFound {
            program: command.program.clone(),
        };
    }

    CommandError::Spawn {
        source: err,
        command: command.clone(),
    }
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Program is not installed.
    #[error("command {program:?} not found")]
    NotFound { program: String },

    /// Program could not be started.
    #[error("failed to run {command}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: CommandLine,
    },

    /// Program exited non-zero.
    #[error("command {command} failed:\n{message}")]
    Failed {
        command: CommandLine,
        message: String,
    },

    /// Program did not finish within its time limit.
    #[error("command {command} did not finish within {timeout:?}")]
    TimedOut {
        command: CommandLine,
        timeout: Duration,
    },

    /// Async runtime for bounded commands could not be built.
    #[error(transparent)]
    Runtime(std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = CommandError> = std::result::Result<T, E>;
