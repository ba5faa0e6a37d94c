// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::protocol::Outbound;
use crate::run::engine::{Engine, EngineEvent, RunSpec};
use crate::sender::OutboundSender;
use crate::workspace::prd::{self, PrdState, UserStory};

/// Sender that records every outbound message for assertions.
#[derive(Default)]
pub struct CaptureSender {
    messages: Mutex<Vec<serde_json::Value>>,
}

impl CaptureSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All captured messages so far, as JSON values.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.messages.lock().clone()
    }

    /// Captured messages of one wire type.
    pub fn of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.get("type").and_then(|t| t.as_str()) == Some(kind))
            .cloned()
            .collect()
    }

    /// Wait until at least one message of `kind` has been captured.
    /// Callers bound this with `tokio::time::timeout`.
    pub async fn wait_for(&self, kind: &str) -> serde_json::Value {
        loop {
            if let Some(found) = self.of_type(kind).into_iter().next() {
                return found;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl OutboundSender for CaptureSender {
    fn send(&self, msg: &Outbound) -> anyhow::Result<()> {
        let value = serde_json::to_value(msg)?;
        self.messages.lock().push(value);
        Ok(())
    }
}

/// Builder for a temp workspace with projects and PRDs on disk.
pub struct TestWorkspace {
    pub dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        // OK to panic in test-only code — infra setup failure is fatal.
        #[allow(clippy::expect_used)]
        let dir = tempfile::tempdir().expect("create temp workspace");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a bare project directory, returning its path.
    pub fn project(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        let _ = std::fs::create_dir_all(&path);
        path
    }

    /// Create a project with one PRD whose stories are `(id, passes)` pairs.
    pub fn project_with_prd(&self, name: &str, prd_id: &str, stories: &[(&str, bool)]) -> PathBuf {
        let path = self.project(name);
        let json = prd::prd_json_path(&path, prd_id);
        let _ = std::fs::create_dir_all(json.parent().unwrap_or(&path));
        let state = PrdState {
            project: name.to_owned(),
            name: Some(prd_id.to_owned()),
            user_stories: stories
                .iter()
                .map(|(id, passes)| UserStory {
                    id: (*id).to_owned(),
                    title: format!("story {id}"),
                    passes: *passes,
                    in_progress: None,
                })
                .collect(),
        };
        let _ = prd::save(&json, &state);
        let _ = std::fs::write(prd::prd_md_path(&path, prd_id), format!("# {prd_id}\n"));
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Write an executable shell script standing in for the agent CLI.
///
/// The daemon passes `--print --verbose --output-format stream-json
/// <prompt>`; scripts ignore their arguments and speak stream-json on
/// stdout while reading stdin from the PTY slave.
pub fn fake_agent(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-agent.sh");
    let script = format!("#!/bin/sh\n{body}\n");
    let _ = std::fs::write(&path, script);
    if let Ok(meta) = std::fs::metadata(&path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o755);
        let _ = std::fs::set_permissions(&path, perms);
    }
    path
}

/// A stream-json assistant line carrying `text`, for fake agent scripts.
pub fn assistant_line(text: &str) -> String {
    format!(
        r#"{{"type":"assistant","message":{{"content":[{{"type":"text","text":"{text}"}}]}}}}"#
    )
}

/// Engine double: records calls, lets tests inject events.
pub struct MockEngine {
    pub started: Mutex<Vec<RunSpec>>,
    pub stopped: Mutex<Vec<String>>,
    pub stop_all_calls: Mutex<u32>,
    event_tx: broadcast::Sender<EngineEvent>,
    /// When set, `start` fails with this message.
    pub fail_start: Mutex<Option<String>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            stop_all_calls: Mutex::new(0),
            event_tx,
            fail_start: Mutex::new(None),
        })
    }

    /// Inject an event as if the inner loop emitted it.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Engine for MockEngine {
    fn start(&self, spec: RunSpec) -> anyhow::Result<()> {
        if let Some(msg) = self.fail_start.lock().clone() {
            anyhow::bail!("{msg}");
        }
        self.started.lock().push(spec);
        Ok(())
    }

    fn stop(&self, key: &str) -> anyhow::Result<()> {
        self.stopped.lock().push(key.to_owned());
        Ok(())
    }

    fn stop_all(&self) {
        *self.stop_all_calls.lock() += 1;
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }
}
