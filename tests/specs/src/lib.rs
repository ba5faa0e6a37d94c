// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end daemon smoke tests.
//!
//! Spawns the real `chiefd` binary as a subprocess, stands in for the
//! control plane with an in-process server, and exercises the daemon over
//! the same HTTP + WebSocket surface production uses.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path as UrlPath, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Resolve the path to the compiled `chiefd` binary.
pub fn chiefd_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("chiefd")
}

struct PlaneState {
    /// Token the register endpoint accepts.
    accepted_token: String,
    /// Token minted by the refresh endpoint.
    fresh_token: String,
    received: Mutex<Vec<Value>>,
    register_calls: Mutex<u32>,
    refresh_calls: Mutex<u32>,
    command_tx: broadcast::Sender<String>,
    /// Cancelling the current generation closes every open subscription.
    ws_generation: Mutex<CancellationToken>,
}

/// In-process stand-in for the control plane.
pub struct FakeControlPlane {
    pub url: String,
    state: Arc<PlaneState>,
}

impl FakeControlPlane {
    /// Bind on an ephemeral port, accepting `accepted_token` as the only
    /// valid bearer token.
    pub async fn spawn(accepted_token: &str) -> anyhow::Result<Self> {
        let (command_tx, _) = broadcast::channel(64);
        let state = Arc::new(PlaneState {
            accepted_token: accepted_token.to_owned(),
            fresh_token: accepted_token.to_owned(),
            received: Mutex::new(Vec::new()),
            register_calls: Mutex::new(0),
            refresh_calls: Mutex::new(0),
            command_tx,
            ws_generation: Mutex::new(CancellationToken::new()),
        });

        let router = axum::Router::new()
            .route("/api/v1/daemons/register", post(register))
            .route("/api/v1/daemons/{id}/messages", post(messages))
            .route("/api/v1/daemons/{id}/commands", get(commands))
            .route("/api/v1/auth/token", post(token))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { url: format!("http://{addr}"), state })
    }

    /// Push one command frame to every subscribed daemon.
    pub fn send_command(&self, command: Value) {
        let _ = self.state.command_tx.send(command.to_string());
    }

    /// Every message the daemon has delivered so far, oldest first.
    pub fn messages(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    pub fn of_type(&self, kind: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.get("type").and_then(Value::as_str) == Some(kind))
            .collect()
    }

    pub fn register_calls(&self) -> u32 {
        *self.state.register_calls.lock()
    }

    pub fn refresh_calls(&self) -> u32 {
        *self.state.refresh_calls.lock()
    }

    /// Wait (bounded) for the nth message of `kind`.
    pub async fn wait_for_nth(&self, kind: &str, n: usize, deadline: Duration) -> Value {
        let step = Duration::from_millis(20);
        let mut waited = Duration::ZERO;
        loop {
            let found = self.of_type(kind);
            if found.len() > n {
                return found[n].clone();
            }
            assert!(waited < deadline, "timed out waiting for {kind}[{n}]");
            tokio::time::sleep(step).await;
            waited += step;
        }
    }

    pub async fn wait_for(&self, kind: &str, deadline: Duration) -> Value {
        self.wait_for_nth(kind, 0, deadline).await
    }

    /// Close every open command subscription, forcing a reconnect.
    pub fn drop_subscriptions(&self) {
        let mut generation = self.state.ws_generation.lock();
        generation.cancel();
        *generation = CancellationToken::new();
    }

    /// Messages received strictly after index `mark`.
    pub fn messages_after(&self, mark: usize) -> Vec<Value> {
        self.messages().split_off(mark)
    }

    pub fn message_count(&self) -> usize {
        self.state.received.lock().len()
    }
}

async fn register(
    State(state): State<Arc<PlaneState>>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    *state.register_calls.lock() += 1;
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if bearer != state.accepted_token {
        return (axum::http::StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    Json(json!({ "ok": true })).into_response()
}

async fn messages(
    State(state): State<Arc<PlaneState>>,
    UrlPath(_id): UrlPath<String>,
    Json(batch): Json<Vec<Value>>,
) -> impl IntoResponse {
    state.received.lock().extend(batch);
    Json(json!({ "ok": true }))
}

async fn commands(
    State(state): State<Arc<PlaneState>>,
    UrlPath(_id): UrlPath<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let generation = state.ws_generation.lock().clone();
    let command_rx = state.command_tx.subscribe();
    ws.on_upgrade(move |socket| serve_commands(socket, command_rx, generation))
}

async fn serve_commands(
    mut socket: WebSocket,
    mut command_rx: broadcast::Receiver<String>,
    generation: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = generation.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            command = command_rx.recv() => {
                let Ok(command) = command else { return };
                if socket.send(Message::Text(command.into())).await.is_err() {
                    return;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {}
                    _ => return,
                }
            }
        }
    }
}

async fn token(State(state): State<Arc<PlaneState>>) -> impl IntoResponse {
    *state.refresh_calls.lock() += 1;
    Json(json!({
        "access_token": state.fresh_token,
        "refresh_token": "rotated-refresh",
        "expires_in": 3600,
    }))
}

/// A spawned `chiefd` under test.
pub struct DaemonProc {
    child: Child,
    pub workspace: tempfile::TempDir,
}

/// Builder-ish spawn: workspace dir, credentials file, env overrides.
pub fn spawn_daemon(
    server_url: &str,
    access_token: &str,
    extra_env: &[(&str, &str)],
) -> anyhow::Result<DaemonProc> {
    let workspace = tempfile::tempdir()?;
    let creds_path = workspace.path().join("credentials.json");
    std::fs::write(
        &creds_path,
        json!({
            "access_token": access_token,
            "refresh_token": "seed-refresh",
            "expires_at": 0,
        })
        .to_string(),
    )?;

    let mut cmd = Command::new(chiefd_binary());
    cmd.env("CHIEF_WORKSPACE", workspace.path())
        .env("CHIEF_SERVER_URL", server_url)
        .env("CHIEF_CREDENTIALS", &creds_path)
        .env("CHIEF_LOG_LEVEL", "debug")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    let child = cmd.spawn()?;
    Ok(DaemonProc { child, workspace })
}

impl DaemonProc {
    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    /// Create a project with one PRD on disk.
    pub fn seed_prd(&self, project: &str, prd_id: &str, stories: &[(&str, bool)]) -> PathBuf {
        let project_path = self.workspace.path().join(project);
        let prd_dir = project_path.join(".chief").join("prds").join(prd_id);
        std::fs::create_dir_all(&prd_dir).unwrap_or_default();
        let stories: Vec<Value> = stories
            .iter()
            .map(|(id, passes)| json!({ "id": id, "title": format!("story {id}"), "passes": passes }))
            .collect();
        let _ = std::fs::write(
            prd_dir.join("prd.json"),
            json!({ "project": project, "name": prd_id, "userStories": stories }).to_string(),
        );
        let _ = std::fs::write(prd_dir.join("prd.md"), format!("# {prd_id}\n"));
        project_path
    }

    /// Send SIGTERM and wait for exit, asserting the shutdown deadline.
    pub fn terminate_within(&mut self, deadline: Duration) -> anyhow::Result<i32> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)?;
        let start = std::time::Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status.code().unwrap_or(-1));
            }
            if start.elapsed() > deadline {
                let _ = self.child.kill();
                anyhow::bail!("daemon did not exit within {deadline:?}");
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for DaemonProc {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Write an executable helper script into a directory.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let _ = std::fs::write(&path, format!("#!/bin/sh\n{body}\n"));
    if let Ok(meta) = std::fs::metadata(&path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o755);
        let _ = std::fs::set_permissions(&path, perms);
    }
    path
}
