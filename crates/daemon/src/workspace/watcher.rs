// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-driven change notification for active projects. Failure to start
//! the watcher is non-fatal; the periodic scanner still refreshes the index.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::scanner::Scanner;
use crate::protocol::Outbound;
use crate::sender::OutboundSender;

/// How long to let an event batch settle before rescanning.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches the workspace root and pushes `project_state` for projects the
/// control plane has opened.
///
/// Owns its own stop token rather than the root one: the shutdown
/// coordinator closes the watcher at a fixed point in its sequence, after
/// the engine is down and before the uplink flushes, so no late
/// `project_state` can race the final batch.
pub struct WorkspaceWatcher {
    scanner: Arc<Scanner>,
    sender: Arc<dyn OutboundSender>,
    active: parking_lot::RwLock<HashSet<String>>,
    stop: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WorkspaceWatcher {
    pub fn new(scanner: Arc<Scanner>, sender: Arc<dyn OutboundSender>) -> Arc<Self> {
        Arc::new(Self {
            scanner,
            sender,
            active: parking_lot::RwLock::new(HashSet::new()),
            stop: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        })
    }

    /// Register interest in a project; the dispatcher activates projects as
    /// clients open them.
    pub fn activate(&self, project: &str) {
        self.active.write().insert(project.to_owned());
    }

    pub fn is_active(&self, project: &str) -> bool {
        self.active.read().contains(project)
    }

    /// Start watching. Returns an error only when the underlying notify
    /// watcher cannot be created; the caller logs and proceeds scan-only.
    pub fn spawn(self: &Arc<Self>) -> anyhow::Result<()> {
        use notify::{RecursiveMode, Watcher};

        let root = self.scanner.workspace_path().to_path_buf();
        let (event_tx, event_rx) = mpsc::channel::<Vec<PathBuf>>(64);

        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                if let Ok(event) = result {
                    let _ = event_tx.try_send(event.paths);
                }
            })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // Keep the notify handle alive for the lifetime of the loop.
            let _watcher = watcher;
            this.run(event_rx, &root).await;
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop watching and wait for the loop (including any in-flight
    /// debounce) to finish. Idempotent.
    pub async fn close(&self) {
        self.stop.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(&self, mut event_rx: mpsc::Receiver<Vec<PathBuf>>, root: &Path) {
        loop {
            let first = tokio::select! {
                _ = self.stop.cancelled() => return,
                paths = event_rx.recv() => match paths {
                    Some(paths) => paths,
                    None => return,
                },
            };

            // Debounce: drain whatever else lands in the settle window.
            let mut affected: HashSet<String> = HashSet::new();
            collect_projects(&mut affected, &first, root);
            let settle = tokio::time::sleep(DEBOUNCE);
            tokio::pin!(settle);
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => return,
                    _ = &mut settle => break,
                    paths = event_rx.recv() => match paths {
                        Some(paths) => collect_projects(&mut affected, &paths, root),
                        None => break,
                    },
                }
            }

            self.scanner.scan_and_update();

            let active = self.active.read().clone();
            for project in affected.iter().filter(|p| active.contains(*p)) {
                match self.scanner.find_project(project) {
                    Some(summary) => {
                        if let Err(e) = self.sender.send(&Outbound::ProjectState { project: summary }) {
                            warn!(err = %e, "project_state emission failed");
                        }
                    }
                    None => debug!(%project, "changed project vanished before emit"),
                }
            }
        }
    }
}

/// Map changed paths to the project (first path component under the root).
fn collect_projects(out: &mut HashSet<String>, paths: &[PathBuf], root: &Path) {
    for path in paths {
        let Ok(rel) = path.strip_prefix(root) else { continue };
        if let Some(first) = rel.components().next() {
            let name = first.as_os_str().to_string_lossy();
            if !name.starts_with('.') && !name.is_empty() {
                out.insert(name.into_owned());
            }
        }
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
