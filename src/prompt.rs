// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Confirm-or-abort prompts.

use inquire::{Confirm as ConfirmPrompt, InquireError};
use tracing::debug;

/// Ask the user a yes or no question.
pub trait Confirm {
    /// Ask `message`, falling back to `default` on empty input.
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;
}

impl<C> Confirm for &C
where
    C: Confirm,
{
    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        (**self).confirm(message, default)
    }
}

/// Ask on the terminal through inquire.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        match ConfirmPrompt::new(message).with_default(default).prompt() {
            Ok(answer) => Ok(answer),
            // INVARIANT: Escape or Ctrl-C means no, not an error.
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(false),
            Err(error) => Err(PromptError::Inquire(error)),
        }
    }
}

/// Answer yes to everything without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, message: &str, _default: bool) -> Result<bool> {
        debug!("assume yes: {message}");
        Ok(true)
    }
}

/// Prompt error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Terminal prompt failed, e.g., no TTY is attached.
    #[error(transparent)]
    Inquire(#[from] InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
