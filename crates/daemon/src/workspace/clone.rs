// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository provisioning: `clone_repo` and `create_project`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::error::{command_err, ErrorCode};
use crate::protocol::Outbound;
use crate::sender::OutboundSender;

/// Derive a project directory name from a clone URL, e.g.
/// `git@host:org/widget.git` → `widget`.
pub fn infer_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_owned()
}

/// Run `git clone --progress`, streaming `clone_progress` events, then
/// `clone_complete`. A pre-existing target errors up front and touches
/// nothing.
pub async fn clone_repo(
    workspace: &Path,
    url: &str,
    directory_name: Option<&str>,
    sender: Arc<dyn OutboundSender>,
) -> anyhow::Result<String> {
    let name = match directory_name {
        Some(n) if !n.is_empty() => n.to_owned(),
        _ => infer_name(url),
    };
    if name.is_empty() || name.starts_with('.') || name.contains('/') {
        return Err(command_err(ErrorCode::CloneFailed, format!("unusable directory name: {name:?}")));
    }

    let target = workspace.join(&name);
    if target.exists() {
        return Err(command_err(
            ErrorCode::CloneFailed,
            format!("target directory already exists: {name}"),
        ));
    }

    let mut child = tokio::process::Command::new("git")
        .arg("clone")
        .arg("--progress")
        .arg(url)
        .arg(&target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| command_err(ErrorCode::CloneFailed, format!("spawning git: {e}")))?;

    // git writes progress to stderr; forward percentage lines as they come.
    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        let percent_re = regex::Regex::new(r"(\d{1,3})%").ok();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_owned();
            if line.is_empty() {
                continue;
            }
            let percent = percent_re
                .as_ref()
                .and_then(|re| re.captures(&line))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u8>().ok());
            let _ = sender.send(&Outbound::CloneProgress {
                url: url.to_owned(),
                message: line,
                percent,
            });
        }
    }

    let status = child.wait().await?;
    if status.success() {
        let _ = sender.send(&Outbound::CloneComplete {
            success: true,
            project: Some(name.clone()),
            error: None,
        });
        Ok(name)
    } else {
        // git can leave a partial checkout behind on failure.
        if target.exists() {
            if let Err(e) = std::fs::remove_dir_all(&target) {
                warn!(err = %e, "failed to remove partial clone");
            }
        }
        let detail = format!("git clone exited with {status}");
        debug!(url, %detail, "clone failed");
        let _ = sender.send(&Outbound::CloneComplete {
            success: false,
            project: None,
            error: Some(detail.clone()),
        });
        Err(command_err(ErrorCode::CloneFailed, detail))
    }
}

/// Create an empty project directory, optionally `git init`ed.
pub async fn create_project(workspace: &Path, name: &str, git_init: bool) -> anyhow::Result<PathBuf> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') {
        return Err(command_err(
            ErrorCode::FilesystemError,
            format!("unusable project name: {name:?}"),
        ));
    }
    let target = workspace.join(name);
    if target.exists() {
        return Err(command_err(
            ErrorCode::FilesystemError,
            format!("project already exists: {name}"),
        ));
    }
    std::fs::create_dir_all(&target)
        .map_err(|e| command_err(ErrorCode::FilesystemError, format!("mkdir {name}: {e}")))?;

    if git_init {
        let status = tokio::process::Command::new("git")
            .arg("init")
            .current_dir(&target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| command_err(ErrorCode::FilesystemError, format!("spawning git init: {e}")))?;
        if !status.success() {
            return Err(command_err(
                ErrorCode::FilesystemError,
                format!("git init exited with {status}"),
            ));
        }
    }

    Ok(target)
}

#[cfg(test)]
#[path = "clone_tests.rs"]
mod tests;
