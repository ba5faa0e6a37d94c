// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-visible error codes carried by outbound `error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProjectNotFound,
    PrdNotFound,
    SessionNotFound,
    RunAlreadyActive,
    RunNotActive,
    CloneFailed,
    FilesystemError,
    ClaudeError,
    RateLimited,
    UpdateFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::PrdNotFound => "PRD_NOT_FOUND",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::RunAlreadyActive => "RUN_ALREADY_ACTIVE",
            Self::RunNotActive => "RUN_NOT_ACTIVE",
            Self::CloneFailed => "CLONE_FAILED",
            Self::FilesystemError => "FILESYSTEM_ERROR",
            Self::ClaudeError => "CLAUDE_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::UpdateFailed => "UPDATE_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler failure destined for the wire: code plus a human message.
///
/// Handlers return this through `anyhow` context chains; the dispatcher
/// downcasts to recover the code and falls back to `FILESYSTEM_ERROR` for
/// untyped I/O failures.
#[derive(Debug, Clone)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

/// Shorthand used throughout command handlers.
pub fn command_err(code: ErrorCode, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(CommandError::new(code, message))
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
