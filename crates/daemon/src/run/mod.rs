// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ralph-loop run supervision: registration with the engine, the
//! pause/resume/stop state machine, event fan-out, and per-story logging.

pub mod diff;
pub mod engine;
pub mod story_log;
pub mod subprocess;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{command_err, ErrorCode};
use crate::protocol::{Outbound, RunSnapshot};
use crate::sender::OutboundSender;
use crate::workspace::prd;

use engine::{run_key, Engine, EngineEvent, EngineEventKind, RunSpec};
use story_log::StoryLogger;

/// Live run states; terminal outcomes remove the entry instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

/// One supervised run. Exists exactly while the run is running or paused.
pub struct RunEntry {
    pub key: String,
    pub project: String,
    pub prd_id: String,
    pub project_path: std::path::PathBuf,
    pub prd_path: std::path::PathBuf,
    started_at: Instant,
    started_wall: chrono::DateTime<chrono::Utc>,
    story_id: parking_lot::Mutex<String>,
    state: parking_lot::Mutex<RunState>,
    logger: StoryLogger,
}

impl RunEntry {
    pub fn story_id(&self) -> String {
        self.story_id.lock().clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }
}

/// Owner of the run table; the only writer of its entries.
pub struct RunManager {
    engine: Arc<dyn Engine>,
    sender: Arc<dyn OutboundSender>,
    runs: RwLock<HashMap<String, Arc<RunEntry>>>,
}

impl RunManager {
    pub fn new(engine: Arc<dyn Engine>, sender: Arc<dyn OutboundSender>) -> Arc<Self> {
        Arc::new(Self { engine, sender, runs: RwLock::new(HashMap::new()) })
    }

    /// Subscribe once to the engine stream and fan events out per run key.
    pub fn spawn_event_monitor(self: &Arc<Self>, shutdown: CancellationToken) {
        let manager = Arc::clone(self);
        let mut events = self.engine.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = events.recv() => match event {
                        Ok(event) => manager.handle_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "engine event monitor lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });
    }

    /// Start a run. Requires no live entry for the key.
    pub async fn start_run(
        &self,
        project: &str,
        project_path: &Path,
        prd_id: &str,
    ) -> anyhow::Result<()> {
        let key = run_key(project, prd_id);
        let prd_path = prd::prd_json_path(project_path, prd_id);
        if !prd_path.exists() {
            return Err(command_err(ErrorCode::PrdNotFound, format!("no such prd: {prd_id}")));
        }

        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(&key) {
            return Err(command_err(
                ErrorCode::RunAlreadyActive,
                format!("run is {} for {key}", existing.state().as_str()),
            ));
        }

        let logger = StoryLogger::open(&prd_path)?;
        let spec = RunSpec {
            key: key.clone(),
            project: project.to_owned(),
            project_path: project_path.to_path_buf(),
            prd_path: prd_path.clone(),
        };
        self.engine.start(spec)?;

        let entry = Arc::new(RunEntry {
            key: key.clone(),
            project: project.to_owned(),
            prd_id: prd_id.to_owned(),
            project_path: project_path.to_path_buf(),
            prd_path,
            started_at: Instant::now(),
            started_wall: chrono::Utc::now(),
            story_id: parking_lot::Mutex::new(String::new()),
            state: parking_lot::Mutex::new(RunState::Running),
            logger,
        });
        runs.insert(key.clone(), entry);
        info!(%key, "run started");
        Ok(())
    }

    /// Pause a running run. The engine stops iterating; the entry stays.
    pub async fn pause_run(&self, project: &str, prd_id: &str) -> anyhow::Result<()> {
        let key = run_key(project, prd_id);
        let entry = self.get(&key).await?;
        if entry.state() != RunState::Running {
            return Err(command_err(ErrorCode::RunNotActive, format!("run is not running: {key}")));
        }
        self.engine.stop(&key)?;
        *entry.state.lock() = RunState::Paused;
        info!(%key, "run paused");
        let _ = self.sender.send(&Outbound::RunPaused {
            project: entry.project.clone(),
            prd_id: entry.prd_id.clone(),
            reason: "user_requested".to_owned(),
        });
        Ok(())
    }

    /// Resume a paused run by re-starting the engine, which picks up the
    /// next unfinished story from `prd.json`.
    pub async fn resume_run(&self, project: &str, prd_id: &str) -> anyhow::Result<()> {
        let key = run_key(project, prd_id);
        let entry = self.get(&key).await?;
        if entry.state() != RunState::Paused {
            return Err(command_err(ErrorCode::RunNotActive, format!("run is not paused: {key}")));
        }
        self.engine.start(RunSpec {
            key: key.clone(),
            project: entry.project.clone(),
            project_path: entry.project_path.clone(),
            prd_path: entry.prd_path.clone(),
        })?;
        *entry.state.lock() = RunState::Running;
        info!(%key, "run resumed");
        Ok(())
    }

    /// Stop a running or paused run and report its final counts.
    pub async fn stop_run(&self, project: &str, prd_id: &str) -> anyhow::Result<()> {
        let key = run_key(project, prd_id);
        let entry = {
            let mut runs = self.runs.write().await;
            runs.remove(&key).ok_or_else(|| {
                command_err(ErrorCode::RunNotActive, format!("no active run: {key}"))
            })?
        };
        self.engine.stop(&key)?;
        entry.logger.close();
        info!(%key, "run stopped");
        self.emit_run_complete(&entry);
        Ok(())
    }

    /// Persist each live run's current story as `inProgress` so the next
    /// start resumes from it. First step of the shutdown sequence.
    pub async fn mark_interrupted_stories(&self) {
        for entry in self.runs.read().await.values() {
            let story_id = entry.story_id();
            if story_id.is_empty() {
                continue;
            }
            if let Err(e) = prd::mark_in_progress(&entry.prd_path, &story_id) {
                warn!(err = %e, key = %entry.key, "failed to mark interrupted story");
            }
        }
    }

    /// Stop every run and close its logger. Entries are drained; no
    /// completion messages are emitted on this path.
    pub async fn halt_all(&self) {
        let entries: Vec<Arc<RunEntry>> = {
            let mut runs = self.runs.write().await;
            runs.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            if let Err(e) = self.engine.stop(&entry.key) {
                debug!(err = %e, key = %entry.key, "engine stop during halt");
            }
            entry.logger.close();
        }
    }

    /// Tell the engine to tear everything down. Fourth step of shutdown,
    /// after sessions are gone.
    pub fn engine_stop_all(&self) {
        self.engine.stop_all();
    }

    /// Convenience composite used by tests and abnormal exits.
    pub async fn shutdown_all(&self) {
        self.mark_interrupted_stories().await;
        self.halt_all().await;
        self.engine_stop_all();
    }

    pub async fn snapshot(&self) -> Vec<RunSnapshot> {
        let mut runs: Vec<RunSnapshot> = self
            .runs
            .read()
            .await
            .values()
            .map(|e| RunSnapshot {
                project: e.project.clone(),
                prd_id: e.prd_id.clone(),
                state: e.state().as_str().to_owned(),
                story_id: e.story_id(),
                started_at: e.started_wall.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            })
            .collect();
        runs.sort_by(|a, b| a.project.cmp(&b.project).then_with(|| a.prd_id.cmp(&b.prd_id)));
        runs
    }

    async fn get(&self, key: &str) -> anyhow::Result<Arc<RunEntry>> {
        self.runs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| command_err(ErrorCode::RunNotActive, format!("no active run: {key}")))
    }

    async fn handle_event(&self, event: EngineEvent) {
        let Some(entry) = self.runs.read().await.get(&event.key).cloned() else {
            debug!(key = %event.key, "engine event for unknown run");
            return;
        };

        match event.kind {
            EngineEventKind::IterationStarted { iteration } => {
                self.emit_progress(&entry, "iteration_started", iteration, 0);
            }
            EngineEventKind::StoryStarted { story_id, iteration } => {
                *entry.story_id.lock() = story_id;
                self.emit_progress(&entry, "story_started", iteration, 0);
            }
            EngineEventKind::StoryCompleted { story_id, passed } => {
                debug!(key = %entry.key, %story_id, passed, "story completed");
                self.emit_progress(&entry, "story_completed", 0, 0);
                self.spawn_proactive_diff(&entry, story_id);
            }
            EngineEventKind::Retrying { attempt } => {
                self.emit_progress(&entry, "retrying", 0, attempt);
            }
            EngineEventKind::AssistantText { text } => self.stream_output(&entry, &text),
            EngineEventKind::ToolStart { text } => self.stream_output(&entry, &text),
            EngineEventKind::ToolResult { text } => self.stream_output(&entry, &text),
            EngineEventKind::Error { detail } => self.stream_output(&entry, &detail),
            EngineEventKind::Complete => {
                self.emit_progress(&entry, "complete", 0, 0);
                self.finish(&entry).await;
            }
            EngineEventKind::MaxIterationsReached => {
                self.emit_progress(&entry, "max_iterations_reached", 0, 0);
                self.finish(&entry).await;
            }
            EngineEventKind::QuotaExhausted => {
                *entry.state.lock() = RunState::Paused;
                info!(key = %entry.key, "run auto-paused: quota exhausted");
                let _ = self.sender.send(&Outbound::RunPaused {
                    project: entry.project.clone(),
                    prd_id: entry.prd_id.clone(),
                    reason: "quota_exhausted".to_owned(),
                });
                let _ = self.sender.send(&Outbound::QuotaExhausted {
                    runs: vec![entry.key.clone()],
                    sessions: vec![],
                });
            }
        }
    }

    /// Append to the story log and forward the same line as stream output.
    fn stream_output(&self, entry: &RunEntry, text: &str) {
        entry.logger.write(&entry.story_id(), text);
        let _ = self.sender.send(&Outbound::ClaudeOutput {
            project: entry.project.clone(),
            prd_id: entry.prd_id.clone(),
            data: text.to_owned(),
            done: false,
        });
    }

    fn emit_progress(&self, entry: &RunEntry, status: &str, iteration: u32, attempt: u32) {
        let _ = self.sender.send(&Outbound::RunProgress {
            project: entry.project.clone(),
            prd_id: entry.prd_id.clone(),
            status: status.to_owned(),
            iteration,
            attempt,
            story_id: entry.story_id(),
        });
    }

    /// Resolve the story commit and push its diff without being asked.
    fn spawn_proactive_diff(&self, entry: &Arc<RunEntry>, story_id: String) {
        let sender = Arc::clone(&self.sender);
        let entry = Arc::clone(entry);
        tokio::spawn(async move {
            match diff::story_diff(&entry.project_path, &story_id).await {
                Ok(Some((files, diff_text))) => {
                    let _ = sender.send(&Outbound::Diff {
                        project: entry.project.clone(),
                        prd_id: entry.prd_id.clone(),
                        story_id,
                        files,
                        diff_text,
                    });
                }
                Ok(None) => debug!(%story_id, "no commit found for completed story"),
                Err(e) => debug!(err = %e, %story_id, "proactive diff failed"),
            }
        });
    }

    /// Terminal outcome: remove the entry, close logs, report counts.
    async fn finish(&self, entry: &Arc<RunEntry>) {
        self.runs.write().await.remove(&entry.key);
        entry.logger.close();
        // End-of-stream marker for clients tailing claude_output.
        let _ = self.sender.send(&Outbound::ClaudeOutput {
            project: entry.project.clone(),
            prd_id: entry.prd_id.clone(),
            data: String::new(),
            done: true,
        });
        self.emit_run_complete(entry);
    }

    fn emit_run_complete(&self, entry: &RunEntry) {
        let (pass_count, total) = match prd::load(&entry.prd_path) {
            Ok(state) => state.counts(),
            Err(e) => {
                warn!(err = %e, key = %entry.key, "prd state unreadable at run end");
                (0, 0)
            }
        };
        let _ = self.sender.send(&Outbound::RunComplete {
            project: entry.project.clone(),
            prd_id: entry.prd_id.clone(),
            stories_completed: pass_count,
            pass_count,
            fail_count: total.saturating_sub(pass_count),
            duration_secs: entry.started_at.elapsed().as_secs(),
        });
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
