// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound command dispatcher: a single-threaded reader over the uplink's
//! command stream. Envelope decode → rate limit → route. Long-running
//! handlers (clone, agent spawn, git) are offloaded to their own tasks so
//! the dispatcher never stalls behind child-process I/O.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{command_err, CommandError, ErrorCode};
use crate::protocol::{
    CloneRepoCmd, ClosePrdSessionCmd, CreateProjectCmd, Envelope, GetDiffCmd, GetDiffsCmd,
    GetLogsCmd, NewPrdCmd, Outbound, PrdArg, PrdInfo, PrdMessageCmd, PrdPhase, ProjectArg,
    RefinePrdCmd, UpdateSettingsCmd,
};
use crate::ratelimit::{format_retry_after, RateLimiter};
use crate::run::{diff, RunManager};
use crate::sender::OutboundSender;
use crate::session::SessionManager;
use crate::settings;
use crate::update::{is_newer, Updater};
use crate::workspace::scanner::Scanner;
use crate::workspace::watcher::WorkspaceWatcher;
use crate::workspace::{clone, prd};

/// Default `get_logs` tail length when the command does not say.
const DEFAULT_LOG_LINES: usize = 100;

pub struct Dispatcher {
    pub scanner: Arc<Scanner>,
    pub watcher: Option<Arc<WorkspaceWatcher>>,
    pub sessions: Arc<SessionManager>,
    pub runs: Arc<RunManager>,
    pub sender: Arc<dyn OutboundSender>,
    pub limiter: Arc<RateLimiter>,
    pub updater: Arc<dyn Updater>,
    pub current_version: String,
    /// Cancelled by the dispatcher itself after an update installs, and by
    /// the daemon on its way down.
    pub shutdown: CancellationToken,
}

impl Dispatcher {
    /// Read commands until the stream closes (permanent uplink stop) or
    /// shutdown begins.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<Value>) {
        loop {
            let raw = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                raw = commands.recv() => match raw {
                    Some(raw) => raw,
                    None => {
                        info!("command stream closed");
                        return;
                    }
                },
            };
            self.handle(raw).await;
        }
    }

    async fn handle(self: &Arc<Self>, raw: Value) {
        let (envelope, body) = match Envelope::decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(err = %e, "undecodable command envelope");
                return;
            }
        };

        let decision = self.limiter.allow(&envelope.kind);
        if !decision.allowed {
            debug!(kind = %envelope.kind, "command rate limited");
            let _ = self.sender.send(&Outbound::Error {
                code: ErrorCode::RateLimited,
                message: format_retry_after(decision.retry_after),
                request_id: envelope.id.clone(),
            });
            return;
        }

        let result = self.route(&envelope, body).await;
        if let Err(e) = result {
            self.report_error(&envelope.id, e);
        }
    }

    async fn route(self: &Arc<Self>, envelope: &Envelope, body: Value) -> anyhow::Result<()> {
        match envelope.kind.as_str() {
            "ping" => self.sender.send(&Outbound::Pong),
            "list_projects" => {
                self.scanner.scan_and_update();
                Ok(())
            }
            "get_project" => self.get_project(body),
            "get_prd" => self.get_prd(body),
            "get_prds" => self.get_prds(body),
            "new_prd" => self.new_prd(envelope, body),
            "refine_prd" => self.refine_prd(envelope, body),
            "prd_message" => {
                let cmd: PrdMessageCmd = parse(body)?;
                self.sessions.send_message(&cmd.session_id, &cmd.message).await
            }
            "close_prd_session" => {
                let cmd: ClosePrdSessionCmd = parse(body)?;
                let this = Arc::clone(self);
                let request_id = envelope.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.sessions.close(&cmd.session_id, cmd.save).await {
                        this.report_error(&request_id, e);
                    }
                });
                Ok(())
            }
            "start_run" => {
                let cmd: PrdArg = parse(body)?;
                let path = self.project_path(&cmd.project)?;
                self.runs.start_run(&cmd.project, &path, &cmd.prd_id).await
            }
            "pause_run" => {
                let cmd: PrdArg = parse(body)?;
                self.runs.pause_run(&cmd.project, &cmd.prd_id).await
            }
            "resume_run" => {
                let cmd: PrdArg = parse(body)?;
                self.runs.resume_run(&cmd.project, &cmd.prd_id).await
            }
            "stop_run" => {
                let cmd: PrdArg = parse(body)?;
                self.runs.stop_run(&cmd.project, &cmd.prd_id).await
            }
            "get_diff" => self.get_diff(envelope, body),
            "get_diffs" => self.get_diffs(envelope, body),
            "get_logs" => self.get_logs(body),
            "get_settings" => {
                let cmd: ProjectArg = parse(body)?;
                let path = self.project_path(&cmd.project)?;
                let value = settings::get_settings(&path)?;
                self.sender.send(&Outbound::Settings { project: cmd.project, settings: value })
            }
            "update_settings" => {
                let cmd: UpdateSettingsCmd = parse(body)?;
                let path = self.project_path(&cmd.project)?;
                let merged = settings::update_settings(&path, &cmd.settings)?;
                self.sender.send(&Outbound::Settings { project: cmd.project, settings: merged })
            }
            "clone_repo" => self.clone_repo(envelope, body),
            "create_project" => {
                let cmd: CreateProjectCmd = parse(body)?;
                clone::create_project(self.scanner.workspace_path(), &cmd.name, cmd.git_init)
                    .await?;
                self.scanner.scan_and_update();
                Ok(())
            }
            "trigger_update" => {
                self.trigger_update(envelope);
                Ok(())
            }
            other => {
                debug!(kind = other, "unknown command type ignored");
                Ok(())
            }
        }
    }

    // -- handlers -------------------------------------------------------------

    fn get_project(&self, body: Value) -> anyhow::Result<()> {
        let cmd: ProjectArg = parse(body)?;
        if let Some(ref watcher) = self.watcher {
            watcher.activate(&cmd.project);
        }
        // A project created moments ago may not be in the snapshot yet.
        let summary = match self.scanner.find_project(&cmd.project) {
            Some(summary) => summary,
            None => {
                self.scanner.scan_and_update();
                self.scanner.find_project(&cmd.project).ok_or_else(|| {
                    command_err(ErrorCode::ProjectNotFound, format!("no such project: {}", cmd.project))
                })?
            }
        };
        self.sender.send(&Outbound::ProjectState { project: summary })
    }

    fn get_prd(&self, body: Value) -> anyhow::Result<()> {
        let cmd: PrdArg = parse(body)?;
        let path = self.project_path(&cmd.project)?;
        let md = prd::prd_md_path(&path, &cmd.prd_id);
        if !md.parent().is_some_and(std::path::Path::exists) {
            return Err(command_err(ErrorCode::PrdNotFound, format!("no such prd: {}", cmd.prd_id)));
        }
        let content = std::fs::read_to_string(&md).unwrap_or_default();
        let state = std::fs::read_to_string(prd::prd_json_path(&path, &cmd.prd_id))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null);
        self.sender.send(&Outbound::PrdContent {
            project: cmd.project,
            prd_id: cmd.prd_id,
            content,
            state,
        })
    }

    fn get_prds(&self, body: Value) -> anyhow::Result<()> {
        let cmd: ProjectArg = parse(body)?;
        let path = self.project_path(&cmd.project)?;

        let mut prds = Vec::new();
        if let Ok(entries) = std::fs::read_dir(prd::prds_root(&path)) {
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() {
                    continue;
                }
                let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                    continue;
                };
                let state = prd::load(&dir.join("prd.json")).unwrap_or_default();
                let (passed, total) = state.counts();
                prds.push(PrdInfo {
                    name: state.name.clone().unwrap_or_else(|| id.clone()),
                    story_count: total,
                    status: PrdPhase::from_counts(passed, total),
                    id,
                });
            }
        }
        prds.sort_by(|a, b| a.id.cmp(&b.id));
        self.sender.send(&Outbound::PrdsResponse { project: cmd.project, prds })
    }

    fn new_prd(self: &Arc<Self>, envelope: &Envelope, body: Value) -> anyhow::Result<()> {
        let cmd: NewPrdCmd = parse(body)?;
        let path = self.project_path(&cmd.project)?;
        let this = Arc::clone(self);
        let request_id = envelope.id.clone();
        tokio::spawn(async move {
            let result = this
                .sessions
                .new_prd(&path, &cmd.project, &cmd.session_id, &cmd.message)
                .await;
            if let Err(e) = result {
                this.report_error(&request_id, e);
            }
        });
        Ok(())
    }

    fn refine_prd(self: &Arc<Self>, envelope: &Envelope, body: Value) -> anyhow::Result<()> {
        let cmd: RefinePrdCmd = parse(body)?;
        let path = self.project_path(&cmd.project)?;
        let this = Arc::clone(self);
        let request_id = envelope.id.clone();
        tokio::spawn(async move {
            let result = this
                .sessions
                .refine_prd(&path, &cmd.project, &cmd.session_id, &cmd.prd_id, &cmd.message)
                .await;
            if let Err(e) = result {
                this.report_error(&request_id, e);
            }
        });
        Ok(())
    }

    fn get_diff(self: &Arc<Self>, envelope: &Envelope, body: Value) -> anyhow::Result<()> {
        let cmd: GetDiffCmd = parse(body)?;
        let path = self.project_path(&cmd.project)?;
        let this = Arc::clone(self);
        let request_id = envelope.id.clone();
        tokio::spawn(async move {
            let result = async {
                let (files, diff_text) = diff::story_diff(&path, &cmd.story_id)
                    .await?
                    .ok_or_else(|| {
                        command_err(
                            ErrorCode::FilesystemError,
                            format!("no commit found for story {}", cmd.story_id),
                        )
                    })?;
                this.sender.send(&Outbound::Diff {
                    project: cmd.project,
                    prd_id: cmd.prd_id,
                    story_id: cmd.story_id,
                    files,
                    diff_text,
                })
            }
            .await;
            if let Err(e) = result {
                this.report_error(&request_id, e);
            }
        });
        Ok(())
    }

    fn get_diffs(self: &Arc<Self>, envelope: &Envelope, body: Value) -> anyhow::Result<()> {
        let cmd: GetDiffsCmd = parse(body)?;
        let path = self.project_path(&cmd.project)?;
        let this = Arc::clone(self);
        let request_id = envelope.id.clone();
        tokio::spawn(async move {
            let result = async {
                let files = diff::story_file_diffs(&path, &cmd.story_id)
                    .await?
                    .ok_or_else(|| {
                        command_err(
                            ErrorCode::FilesystemError,
                            format!("no commit found for story {}", cmd.story_id),
                        )
                    })?;
                this.sender.send(&Outbound::DiffsResponse {
                    project: cmd.project,
                    story_id: cmd.story_id,
                    files,
                })
            }
            .await;
            if let Err(e) = result {
                this.report_error(&request_id, e);
            }
        });
        Ok(())
    }

    fn get_logs(&self, body: Value) -> anyhow::Result<()> {
        let cmd: GetLogsCmd = parse(body)?;
        let path = self.project_path(&cmd.project)?;
        let logs_dir = prd::prds_root(&path).join(&cmd.prd_id).join("logs");

        let (story_id, log_path) = match cmd.story_id {
            Some(story_id) => {
                let log_path = logs_dir.join(format!("{story_id}.log"));
                (story_id, log_path)
            }
            None => latest_log(&logs_dir).ok_or_else(|| {
                command_err(
                    ErrorCode::FilesystemError,
                    format!("no story logs for prd {}", cmd.prd_id),
                )
            })?,
        };

        let content = std::fs::read_to_string(&log_path).map_err(|e| {
            command_err(ErrorCode::FilesystemError, format!("reading {story_id} log: {e}"))
        })?;
        let wanted = cmd.lines.unwrap_or(DEFAULT_LOG_LINES);
        let all: Vec<&str> = content.lines().collect();
        let tail = all[all.len().saturating_sub(wanted)..]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();

        self.sender.send(&Outbound::LogLines {
            project: cmd.project,
            prd_id: cmd.prd_id,
            story_id,
            lines: tail,
        })
    }

    fn clone_repo(self: &Arc<Self>, envelope: &Envelope, body: Value) -> anyhow::Result<()> {
        let cmd: CloneRepoCmd = parse(body)?;
        let this = Arc::clone(self);
        let request_id = envelope.id.clone();
        tokio::spawn(async move {
            let result = clone::clone_repo(
                this.scanner.workspace_path(),
                &cmd.url,
                cmd.directory_name.as_deref(),
                Arc::clone(&this.sender),
            )
            .await;
            match result {
                Ok(_) => this.scanner.scan_and_update(),
                Err(e) => this.report_error(&request_id, e),
            }
        });
        Ok(())
    }

    fn trigger_update(self: &Arc<Self>, envelope: &Envelope) {
        let this = Arc::clone(self);
        let request_id = envelope.id.clone();
        tokio::spawn(async move {
            let release = match this.updater.check().await {
                Ok(release) => release,
                Err(e) => {
                    this.report_error(
                        &request_id,
                        command_err(ErrorCode::UpdateFailed, format!("release check: {e}")),
                    );
                    return;
                }
            };

            if is_newer(&this.current_version, &release.version) {
                info!(version = %release.version, "installing update");
                match this.updater.install(&release).await {
                    Ok(()) => {
                        info!("update installed, restarting");
                        this.shutdown.cancel();
                    }
                    Err(e) => this.report_error(
                        &request_id,
                        command_err(ErrorCode::UpdateFailed, format!("install: {e}")),
                    ),
                }
            } else {
                let _ = this.sender.send(&Outbound::UpdateAvailable {
                    current_version: this.current_version.clone(),
                    latest_version: release.version,
                });
            }
        });
    }

    // -- helpers --------------------------------------------------------------

    /// Resolve a project name to its path, rescanning once for projects
    /// created since the last tick.
    fn project_path(&self, project: &str) -> anyhow::Result<PathBuf> {
        let summary = match self.scanner.find_project(project) {
            Some(summary) => summary,
            None => {
                self.scanner.scan_and_update();
                self.scanner.find_project(project).ok_or_else(|| {
                    command_err(ErrorCode::ProjectNotFound, format!("no such project: {project}"))
                })?
            }
        };
        Ok(PathBuf::from(summary.path))
    }

    fn report_error(&self, request_id: &str, err: anyhow::Error) {
        let (code, message) = match err.downcast_ref::<CommandError>() {
            Some(cmd) => (cmd.code, cmd.message.clone()),
            None => (ErrorCode::FilesystemError, format!("{err:#}")),
        };
        warn!(code = %code, request_id, "{message}");
        let _ = self.sender.send(&Outbound::Error {
            code,
            message,
            request_id: request_id.to_owned(),
        });
    }
}

/// Payload decode with the catch-all wire code on failure.
fn parse<T: serde::de::DeserializeOwned>(body: Value) -> anyhow::Result<T> {
    serde_json::from_value(body)
        .map_err(|e| command_err(ErrorCode::FilesystemError, format!("malformed payload: {e}")))
}

/// Most-recently-modified `<story>.log` in a logs directory.
fn latest_log(logs_dir: &std::path::Path) -> Option<(String, PathBuf)> {
    let entries = std::fs::read_dir(logs_dir).ok()?;
    let mut newest: Option<(std::time::SystemTime, String, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else { continue };
        let is_newer = newest.as_ref().map_or(true, |(time, _, _)| modified > *time);
        if is_newer {
            newest = Some((modified, stem.to_owned(), path.clone()));
        }
    }
    newest.map(|(_, story_id, path)| (story_id, path))
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
