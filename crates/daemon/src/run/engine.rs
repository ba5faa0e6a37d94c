// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Ralph-loop engine boundary.
//!
//! The inner loop — one agent iteration over the next unfinished story —
//! lives outside this daemon. The run manager drives it through this trait
//! and consumes its typed event stream; nothing else in the daemon may
//! assume anything about how iterations are executed.

use std::path::PathBuf;

use tokio::sync::broadcast;

/// Everything the engine needs to start (or resume) a run.
///
/// Resuming is the same call: the engine picks up from the first story
/// that does not pass, honoring `inProgress` markers in `prd.json`.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// `"<project>/<prd_id>"`.
    pub key: String,
    pub project: String,
    pub project_path: PathBuf,
    pub prd_path: PathBuf,
}

/// One event from the engine's stream, tagged with its run key.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub key: String,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone)]
pub enum EngineEventKind {
    IterationStarted { iteration: u32 },
    StoryStarted { story_id: String, iteration: u32 },
    StoryCompleted { story_id: String, passed: bool },
    AssistantText { text: String },
    ToolStart { text: String },
    ToolResult { text: String },
    Retrying { attempt: u32 },
    Error { detail: String },
    Complete,
    MaxIterationsReached,
    QuotaExhausted,
}

/// Black-box Ralph-loop executor.
pub trait Engine: Send + Sync {
    /// Begin iterating `spec`. Returns once the run is accepted; progress
    /// arrives on the event stream.
    fn start(&self, spec: RunSpec) -> anyhow::Result<()>;

    /// Stop one run. Used for both `pause_run` and `stop_run`.
    fn stop(&self, key: &str) -> anyhow::Result<()>;

    /// Stop everything; shutdown path.
    fn stop_all(&self);

    /// Subscribe to the event stream. The run manager subscribes exactly
    /// once and fans events out by key.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// Run-table key for a `(project, prd)` pair.
pub fn run_key(project: &str, prd_id: &str) -> String {
    format!("{project}/{prd_id}")
}
