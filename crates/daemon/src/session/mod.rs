// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive PRD session supervision: one agent child process per
//! authoring conversation, indexed by caller-supplied session id.

pub mod pty;
pub mod stream;
pub mod timeout;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{command_err, ErrorCode};
use crate::protocol::{Outbound, SessionSnapshot};
use crate::sender::OutboundSender;
use crate::workspace::convert::{sync_project, PrdConverter};
use crate::workspace::prd;

use pty::PtyMaster;
use stream::{classify_line, StreamLine};
use timeout::{Activity, SessionTimeouts};

const NEW_PRD_PROMPT: &str = "You are drafting a product requirements document with the user. \
Interview them about the feature, then write the PRD to .chief/prds/<kebab-case-id>/prd.md \
with a top-level '# <Title>' heading and a user-story checklist where each line has the form \
'- [ ] US-001: <story title>'. Keep every reply short and end it with a question until the \
user is satisfied.";

/// One live authoring session.
pub struct SessionEntry {
    pub session_id: String,
    pub project: String,
    pub project_path: PathBuf,
    /// Writable input stream; `None` once input has been closed.
    input: tokio::sync::Mutex<Option<PtyMaster>>,
    /// Cancelled by `close_input` so the echo drain drops its fd clone too.
    input_closed: CancellationToken,
    /// Latch so the checker expires a session at most once.
    pub(crate) expiring: std::sync::atomic::AtomicBool,
    child_pid: AtomicU32,
    /// Cancelled when the child has terminated and teardown finished.
    pub done: CancellationToken,
    pub activity: Activity,
}

impl SessionEntry {
    /// Close the input stream. Every master fd clone drops, the child sees
    /// EOF on its terminal, and a well-behaved agent finishes up.
    pub async fn close_input(&self) {
        self.input.lock().await.take();
        self.input_closed.cancel();
    }

    fn signal(&self, sig: Signal) {
        let pid = self.child_pid.load(Ordering::Acquire);
        if pid != 0 {
            let _ = kill(Pid::from_raw(pid as i32), sig);
        }
    }
}

/// Owner of the session table. The table mutex never wraps child I/O.
pub struct SessionManager {
    binary: String,
    pub(crate) timeouts: SessionTimeouts,
    pub(crate) sender: Arc<dyn OutboundSender>,
    converter: Arc<dyn PrdConverter>,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    /// Cancelling this stops the timeout checker.
    pub(crate) ticker: CancellationToken,
}

impl SessionManager {
    pub fn new(
        binary: String,
        timeouts: SessionTimeouts,
        sender: Arc<dyn OutboundSender>,
        converter: Arc<dyn PrdConverter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            binary,
            timeouts,
            sender,
            converter,
            sessions: RwLock::new(HashMap::new()),
            ticker: CancellationToken::new(),
        })
    }

    /// Start the inactivity checker.
    pub fn spawn_timeout_checker(self: &Arc<Self>) {
        tokio::spawn(timeout::run_checker(Arc::clone(self)));
    }

    /// Spawn an authoring session for a new PRD.
    pub async fn new_prd(
        self: &Arc<Self>,
        project_path: &Path,
        project: &str,
        session_id: &str,
        initial_message: &str,
    ) -> anyhow::Result<()> {
        self.spawn_session(project_path, project, session_id, NEW_PRD_PROMPT.to_owned(), initial_message)
            .await
    }

    /// Spawn an editing session for an existing PRD.
    pub async fn refine_prd(
        self: &Arc<Self>,
        project_path: &Path,
        project: &str,
        session_id: &str,
        prd_id: &str,
        message: &str,
    ) -> anyhow::Result<()> {
        let md = prd::prd_md_path(project_path, prd_id);
        if !md.parent().is_some_and(Path::exists) {
            return Err(command_err(ErrorCode::PrdNotFound, format!("no such prd: {prd_id}")));
        }
        let prompt = format!(
            "You are editing the product requirements document at {}. Apply the user's requested \
             changes and rewrite that file, preserving the '- [ ] US-xxx: <title>' checklist \
             format and existing story ids. Keep every reply short.",
            md.display()
        );
        self.spawn_session(project_path, project, session_id, prompt, message).await
    }

    async fn spawn_session(
        self: &Arc<Self>,
        project_path: &Path,
        project: &str,
        session_id: &str,
        prompt: String,
        initial_message: &str,
    ) -> anyhow::Result<()> {
        if self.sessions.read().await.contains_key(session_id) {
            return Err(command_err(
                ErrorCode::ClaudeError,
                format!("session already exists: {session_id}"),
            ));
        }

        let (master, slave) = pty::open()?;
        let mut child = tokio::process::Command::new(&self.binary)
            .arg("--print")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg(&prompt)
            .current_dir(project_path)
            .env("TERM", "xterm-256color")
            .stdin(Stdio::from(slave))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| command_err(ErrorCode::ClaudeError, format!("spawning agent: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| command_err(ErrorCode::ClaudeError, "agent stdout unavailable"))?;

        let entry = Arc::new(SessionEntry {
            session_id: session_id.to_owned(),
            project: project.to_owned(),
            project_path: project_path.to_path_buf(),
            input: tokio::sync::Mutex::new(Some(master.clone())),
            input_closed: CancellationToken::new(),
            expiring: std::sync::atomic::AtomicBool::new(false),
            child_pid: AtomicU32::new(child.id().unwrap_or(0)),
            done: CancellationToken::new(),
            activity: Activity::new(),
        });

        // Re-check under the write lock: a racing spawn with the same id
        // loses, and its child is reaped instead of leaking.
        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(session_id) {
                drop(sessions);
                entry.signal(Signal::SIGKILL);
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                return Err(command_err(
                    ErrorCode::ClaudeError,
                    format!("session already exists: {session_id}"),
                ));
            }
            sessions.insert(session_id.to_owned(), Arc::clone(&entry));
        }
        info!(session_id, project, "prd session started");

        // Echo drain on its own fd clone; stops when input closes so the
        // child can observe EOF.
        tokio::spawn(master.drain_echo(entry.input_closed.clone()));

        // Stdout reader: stream-json → prd_output.
        let reader_handle = {
            let sender = Arc::clone(&self.sender);
            let session_id = session_id.to_owned();
            let project = project.to_owned();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let content = match classify_line(&line) {
                        StreamLine::AssistantText(text) => text,
                        StreamLine::Verbatim(raw) => raw,
                        StreamLine::Skip => continue,
                    };
                    let _ = sender.send(&Outbound::PrdOutput {
                        content,
                        session_id: session_id.clone(),
                        project: project.clone(),
                    });
                }
            })
        };

        // Initial message after the PTY settles.
        {
            let entry = Arc::clone(&entry);
            let message = initial_message.to_owned();
            let settle = self.timeouts.settle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                if let Err(e) = write_line(&entry, &message).await {
                    debug!(err = %e, session_id = %entry.session_id, "initial message write failed");
                }
            });
        }

        // Monitor: waits for the child, then tears the session down.
        // prd_response_complete is the last message for the session, so the
        // stdout reader is awaited before it goes out.
        {
            let manager = Arc::clone(self);
            let entry = Arc::clone(&entry);
            tokio::spawn(async move {
                let mut child = child;
                let status = child.wait().await;
                let _ = reader_handle.await;
                debug!(
                    session_id = %entry.session_id,
                    status = ?status.as_ref().ok(),
                    "prd session child exited"
                );

                let _ = manager.sender.send(&Outbound::PrdResponseComplete {
                    session_id: entry.session_id.clone(),
                    project: entry.project.clone(),
                });

                sync_project(manager.converter.as_ref(), &entry.project_path);

                manager.sessions.write().await.remove(&entry.session_id);
                entry.close_input().await;
                entry.done.cancel();
            });
        }

        Ok(())
    }

    /// Forward one user message to the session's input.
    pub async fn send_message(&self, session_id: &str, content: &str) -> anyhow::Result<()> {
        let entry = self.get(session_id).await?;
        entry.activity.touch();
        write_line(&entry, content).await
    }

    /// Close a session. With `save`, input is closed and the agent finishes
    /// cleanly; otherwise the child is killed. Returns once the child has
    /// terminated and the entry is gone.
    pub async fn close(&self, session_id: &str, save: bool) -> anyhow::Result<()> {
        let entry = self.get(session_id).await?;
        if save {
            entry.close_input().await;
        } else {
            entry.signal(Signal::SIGKILL);
        }
        entry.done.cancelled().await;
        Ok(())
    }

    /// Expire one idle session: close input, grace, kill, announce.
    pub(crate) async fn expire(&self, entry: &Arc<SessionEntry>) {
        entry.close_input().await;
        let graceful = tokio::time::timeout(self.timeouts.expire_grace, entry.done.cancelled())
            .await
            .is_ok();
        if !graceful {
            entry.signal(Signal::SIGKILL);
            entry.done.cancelled().await;
        }
        let _ = self.sender.send(&Outbound::SessionExpired {
            session_id: entry.session_id.clone(),
        });
    }

    /// Shutdown path: stop the checker, close inputs, wait out `grace`,
    /// SIGKILL stragglers, and wait for every teardown to finish.
    pub async fn kill_all(&self, grace: Duration) {
        self.ticker.cancel();

        let entries = self.entries().await;
        if entries.is_empty() {
            return;
        }
        for entry in &entries {
            entry.close_input().await;
        }

        let all_done = async {
            for entry in &entries {
                entry.done.cancelled().await;
            }
        };
        if tokio::time::timeout(grace, all_done).await.is_err() {
            for entry in &entries {
                warn!(session_id = %entry.session_id, "killing unresponsive session");
                entry.signal(Signal::SIGKILL);
            }
            for entry in &entries {
                entry.done.cancelled().await;
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .await
            .values()
            .map(|e| SessionSnapshot {
                session_id: e.session_id.clone(),
                project: e.project.clone(),
            })
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub(crate) async fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions.read().await.values().cloned().collect()
    }

    async fn get(&self, session_id: &str) -> anyhow::Result<Arc<SessionEntry>> {
        self.sessions.read().await.get(session_id).cloned().ok_or_else(|| {
            command_err(ErrorCode::SessionNotFound, format!("no such session: {session_id}"))
        })
    }
}

/// Write `content\n` to a session's PTY input.
async fn write_line(entry: &SessionEntry, content: &str) -> anyhow::Result<()> {
    let input = entry.input.lock().await;
    let Some(ref master) = *input else {
        return Err(command_err(
            ErrorCode::ClaudeError,
            format!("session input closed: {}", entry.session_id),
        ));
    };
    let mut line = content.as_bytes().to_vec();
    line.push(b'\n');
    master.write_all(&line).await?;
    Ok(())
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
