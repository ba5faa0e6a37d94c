// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types: the inbound command envelope, command payloads, and the
//! outbound event messages pushed to the control plane.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// Inbound command envelope.
///
/// Commands may arrive wrapped as `{type, id, timestamp, payload}`; when
/// `payload` is present the handler sees only the payload, otherwise the
/// top-level object itself.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Decode a raw inbound message into `(envelope, handler body)`.
    pub fn decode(raw: Value) -> anyhow::Result<(Envelope, Value)> {
        let envelope: Envelope = serde_json::from_value(raw.clone())?;
        let body = envelope.payload.clone().unwrap_or(raw);
        Ok((envelope, body))
    }
}

/// Current wall-clock time as an RFC3339 UTC string.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// -- Inbound command payloads -------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectArg {
    pub project: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrdArg {
    pub project: String,
    pub prd_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPrdCmd {
    pub project: String,
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefinePrdCmd {
    pub project: String,
    pub session_id: String,
    pub prd_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrdMessageCmd {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClosePrdSessionCmd {
    pub session_id: String,
    #[serde(default)]
    pub save: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetDiffCmd {
    pub project: String,
    pub prd_id: String,
    pub story_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetDiffsCmd {
    pub project: String,
    pub story_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetLogsCmd {
    pub project: String,
    pub prd_id: String,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub lines: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettingsCmd {
    pub project: String,
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloneRepoCmd {
    pub url: String,
    #[serde(default)]
    pub directory_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectCmd {
    pub name: String,
    #[serde(default)]
    pub git_init: bool,
}

// -- Project / PRD summaries --------------------------------------------------

/// One workspace project as seen by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub path: String,
    pub is_git_repo: bool,
    pub prds: Vec<PrdSummary>,
}

/// A PRD directory summary with `passed/total` completion status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrdSummary {
    pub id: String,
    pub name: String,
    pub story_count: usize,
    pub status: String,
}

/// PRD lifecycle bucket derived from the `passed/total` status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrdPhase {
    Draft,
    Active,
    Done,
}

impl PrdPhase {
    /// `"0/0" → draft`, `"n/n" → done`, anything in between → active.
    pub fn from_counts(passed: usize, total: usize) -> Self {
        if total == 0 {
            Self::Draft
        } else if passed >= total {
            Self::Done
        } else {
            Self::Active
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrdInfo {
    pub id: String,
    pub name: String,
    pub story_count: usize,
    pub status: PrdPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub filename: String,
    pub additions: usize,
    pub deletions: usize,
    pub patch: String,
}

/// A live run as reported in `state_snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub project: String,
    pub prd_id: String,
    pub state: String,
    pub story_id: String,
    pub started_at: String,
}

/// A live PRD session as reported in `state_snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub project: String,
}

// -- Outbound events ----------------------------------------------------------

/// Everything the daemon pushes to the control plane.
///
/// The sender adapter stamps `id` and `timestamp` onto the serialized form;
/// the variants carry only the domain fields.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Pong,
    ProjectList {
        projects: Vec<ProjectSummary>,
    },
    ProjectState {
        project: ProjectSummary,
    },
    PrdContent {
        project: String,
        prd_id: String,
        content: String,
        state: Value,
    },
    PrdsResponse {
        project: String,
        prds: Vec<PrdInfo>,
    },
    Diff {
        project: String,
        prd_id: String,
        story_id: String,
        files: Vec<String>,
        diff_text: String,
    },
    DiffsResponse {
        project: String,
        story_id: String,
        files: Vec<FileDiff>,
    },
    LogLines {
        project: String,
        prd_id: String,
        story_id: String,
        lines: Vec<String>,
    },
    Settings {
        project: String,
        settings: Value,
    },
    CloneProgress {
        url: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
    },
    CloneComplete {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        project: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StateSnapshot {
        projects: Vec<ProjectSummary>,
        runs: Vec<RunSnapshot>,
        sessions: Vec<SessionSnapshot>,
    },
    RunProgress {
        project: String,
        prd_id: String,
        status: String,
        iteration: u32,
        attempt: u32,
        story_id: String,
    },
    RunComplete {
        project: String,
        prd_id: String,
        stories_completed: usize,
        pass_count: usize,
        fail_count: usize,
        duration_secs: u64,
    },
    RunPaused {
        project: String,
        prd_id: String,
        reason: String,
    },
    ClaudeOutput {
        project: String,
        prd_id: String,
        data: String,
        done: bool,
    },
    PrdOutput {
        content: String,
        session_id: String,
        project: String,
    },
    PrdResponseComplete {
        session_id: String,
        project: String,
    },
    SessionTimeoutWarning {
        session_id: String,
        minutes_remaining: u64,
    },
    SessionExpired {
        session_id: String,
    },
    UpdateAvailable {
        current_version: String,
        latest_version: String,
    },
    QuotaExhausted {
        runs: Vec<String>,
        sessions: Vec<String>,
    },
    Error {
        code: ErrorCode,
        message: String,
        request_id: String,
    },
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
