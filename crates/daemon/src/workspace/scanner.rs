// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic workspace scan that materializes the project/PRD index consumed
//! by command handlers and the state snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::prd;
use crate::protocol::{Outbound, PrdSummary, ProjectSummary};
use crate::sender::OutboundSender;

/// Owner of the project index. Consumers always see a fully-constructed
/// snapshot; the scanner never mutates a published one.
pub struct Scanner {
    workspace: PathBuf,
    interval: Duration,
    snapshot: parking_lot::RwLock<Arc<Vec<ProjectSummary>>>,
    sender: parking_lot::RwLock<Option<Arc<dyn OutboundSender>>>,
}

impl Scanner {
    pub fn new(workspace: PathBuf, interval: Duration) -> Self {
        Self {
            workspace,
            interval,
            snapshot: parking_lot::RwLock::new(Arc::new(Vec::new())),
            sender: parking_lot::RwLock::new(None),
        }
    }

    /// Attach the outbound sender used for `project_list` emissions.
    pub fn attach_sender(&self, sender: Arc<dyn OutboundSender>) {
        *self.sender.write() = Some(sender);
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace
    }

    /// Current snapshot, by value.
    pub fn projects(&self) -> Vec<ProjectSummary> {
        self.snapshot.read().as_ref().clone()
    }

    pub fn find_project(&self, name: &str) -> Option<ProjectSummary> {
        self.snapshot.read().iter().find(|p| p.name == name).cloned()
    }

    /// Refresh the snapshot without emitting anything. Used on reconnect,
    /// where the state snapshot must be the first message out.
    pub fn rescan(&self) -> Vec<ProjectSummary> {
        let fresh = scan(&self.workspace);
        *self.snapshot.write() = Arc::new(fresh.clone());
        fresh
    }

    /// Synchronous refresh; emits `project_list` when a sender is attached.
    pub fn scan_and_update(&self) {
        let fresh = self.rescan();
        let sender = self.sender.read().clone();
        if let Some(sender) = sender {
            if let Err(e) = sender.send(&Outbound::ProjectList { projects: fresh }) {
                warn!(err = %e, "project_list emission failed");
            }
        }
    }

    /// Periodic scan loop until cancellation.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }
            self.scan_and_update();
        }
    }
}

/// Enumerate immediate workspace subdirectories into project summaries.
pub fn scan(workspace: &Path) -> Vec<ProjectSummary> {
    let entries = match std::fs::read_dir(workspace) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(err = %e, path = %workspace.display(), "workspace scan failed");
            return Vec::new();
        }
    };

    let mut projects = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) if !n.starts_with('.') => n.to_owned(),
            _ => continue,
        };

        projects.push(ProjectSummary {
            is_git_repo: path.join(".git").exists(),
            prds: scan_prds(&path),
            path: path.to_string_lossy().into_owned(),
            name,
        });
    }

    projects.sort_by(|a, b| a.name.cmp(&b.name));
    projects
}

/// Read `.chief/prds/*/prd.json` summaries for one project.
fn scan_prds(project_path: &Path) -> Vec<PrdSummary> {
    let root = prd::prds_root(project_path);
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut prds = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        let json = dir.join("prd.json");
        match prd::load(&json) {
            Ok(state) => {
                prds.push(PrdSummary {
                    name: state.name.clone().unwrap_or_else(|| id.clone()),
                    story_count: state.user_stories.len(),
                    status: state.status(),
                    id,
                });
            }
            Err(e) => {
                // A PRD exists iff its directory exists; unreadable state
                // still lists the PRD, just with empty counts.
                debug!(err = %e, prd = %id, "unreadable prd.json");
                prds.push(PrdSummary { name: id.clone(), story_count: 0, status: "0/0".to_owned(), id });
            }
        }
    }

    prds.sort_by(|a, b| a.id.cmp(&b.id));
    prds
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
