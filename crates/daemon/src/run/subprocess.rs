// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess adapter for the Ralph-loop engine.
//!
//! The engine ships as a separate executable. Commands go to its stdin as
//! JSONL (`{"cmd":"start",...}`); events come back on stdout as JSONL and
//! are translated into [`EngineEvent`]s. The child is spawned lazily on
//! the first `start`, so a missing engine binary only fails `start_run`,
//! never daemon startup. The engine exits when its stdin closes, which is
//! what keeps shutdown orphan-free without signalling it.

use std::process::Stdio;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::engine::{Engine, EngineEvent, EngineEventKind, RunSpec};

type ProcSlot = Arc<parking_lot::Mutex<Option<mpsc::UnboundedSender<Value>>>>;

pub struct SubprocessEngine {
    binary: String,
    proc: ProcSlot,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl SubprocessEngine {
    pub fn new(binary: impl Into<String>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            binary: binary.into(),
            proc: Arc::new(parking_lot::Mutex::new(None)),
            event_tx,
        })
    }

    /// Send one command line, spawning the engine first if needed.
    fn send_command(&self, command: Value) -> anyhow::Result<()> {
        let mut slot = self.proc.lock();
        if let Some(ref tx) = *slot {
            if tx.send(command.clone()).is_ok() {
                return Ok(());
            }
            // Writer gone: the engine died. Respawn below.
            *slot = None;
        }

        let tx = self.spawn_engine()?;
        tx.send(command)
            .map_err(|_| anyhow::anyhow!("engine process rejected command"))?;
        *slot = Some(tx);
        Ok(())
    }

    fn spawn_engine(&self) -> anyhow::Result<mpsc::UnboundedSender<Value>> {
        let mut child = tokio::process::Command::new(&self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawning engine {}: {e}", self.binary))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("engine stdout unavailable"))?;
        info!(binary = %self.binary, "engine process started");

        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        // Writer: command channel → engine stdin.
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let mut line = command.to_string().into_bytes();
                line.push(b'\n');
                if stdin.write_all(&line).await.is_err() {
                    return;
                }
            }
        });

        // Reader: engine stdout → event broadcast. Clears the proc slot on
        // EOF so the next start respawns.
        let event_tx = self.event_tx.clone();
        let slot = Arc::clone(&self.proc);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => match parse_engine_event(&value) {
                        Some(event) => {
                            let _ = event_tx.send(event);
                        }
                        None => debug!(%line, "unrecognized engine event"),
                    },
                    Err(e) => debug!(err = %e, "non-JSON engine output"),
                }
            }
            warn!("engine event stream ended");
            slot.lock().take();
            let _ = child.wait().await;
        });

        Ok(tx)
    }
}

impl Engine for SubprocessEngine {
    fn start(&self, spec: RunSpec) -> anyhow::Result<()> {
        self.send_command(json!({
            "cmd": "start",
            "key": spec.key,
            "project": spec.project,
            "project_path": spec.project_path,
            "prd_path": spec.prd_path,
        }))
    }

    fn stop(&self, key: &str) -> anyhow::Result<()> {
        self.send_command(json!({ "cmd": "stop", "key": key }))
    }

    fn stop_all(&self) {
        if let Err(e) = self.send_command(json!({ "cmd": "stop_all" })) {
            debug!(err = %e, "engine stop_all skipped");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }
}

/// Translate one engine stdout line into a typed event.
fn parse_engine_event(value: &Value) -> Option<EngineEvent> {
    let key = value.get("key")?.as_str()?.to_owned();
    let event = value.get("event")?.as_str()?;

    let text = |field: &str| {
        value.get(field).and_then(Value::as_str).unwrap_or_default().to_owned()
    };
    let number =
        |field: &str| value.get(field).and_then(Value::as_u64).unwrap_or_default() as u32;

    let kind = match event {
        "iteration_started" => EngineEventKind::IterationStarted { iteration: number("iteration") },
        "story_started" => EngineEventKind::StoryStarted {
            story_id: text("story_id"),
            iteration: number("iteration"),
        },
        "story_completed" => EngineEventKind::StoryCompleted {
            story_id: text("story_id"),
            passed: value.get("passed").and_then(Value::as_bool).unwrap_or(false),
        },
        "assistant_text" => EngineEventKind::AssistantText { text: text("text") },
        "tool_start" => EngineEventKind::ToolStart { text: text("text") },
        "tool_result" => EngineEventKind::ToolResult { text: text("text") },
        "retrying" => EngineEventKind::Retrying { attempt: number("attempt") },
        "error" => EngineEventKind::Error { detail: text("detail") },
        "complete" => EngineEventKind::Complete,
        "max_iterations_reached" => EngineEventKind::MaxIterationsReached,
        "quota_exhausted" => EngineEventKind::QuotaExhausted,
        _ => return None,
    };
    Some(EngineEvent { key, kind })
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
