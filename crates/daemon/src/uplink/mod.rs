// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting uplink to the control plane: HTTP for registration and
//! outbound batches, a WebSocket subscription for inbound commands.

pub mod batcher;
pub mod http;
mod subscribe;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use batcher::Batcher;
use http::HttpClient;

/// Outbound priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Errors, lifecycle transitions, snapshots. Never dropped.
    Control,
    /// Iteration/story progress, diffs, listings.
    Progress,
    /// Agent text and tool output. First to be shed.
    Stream,
}

/// Why `Uplink::connect` failed.
#[derive(Debug)]
pub enum ConnectError {
    /// Credentials invalid or revoked; the caller should re-authenticate.
    AuthFailed(String),
    /// Network-level failure.
    Transport(anyhow::Error),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailed(detail) => write!(f, "authentication failed: {detail}"),
            Self::Transport(e) => write!(f, "transport failure: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Hook invoked after every successful reconnect, before command delivery
/// resumes. The daemon uses it to push a fresh state snapshot.
pub type ReconnectHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Hook invoked when the server reports `auth_failed`. Returns a fresh
/// access token; an error makes the uplink fail permanently.
pub type AuthFailureHook =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>> + Send + Sync>;

/// Hook storage, settable after construction so the daemon can wire its
/// managers before reconnects can fire.
#[derive(Default)]
pub struct HookSlots {
    on_reconnect: parking_lot::RwLock<Option<ReconnectHook>>,
    on_auth_failure: parking_lot::RwLock<Option<AuthFailureHook>>,
}

impl HookSlots {
    pub(crate) fn reconnect_hook(&self) -> Option<ReconnectHook> {
        self.on_reconnect.read().clone()
    }

    pub(crate) fn auth_failure_hook(&self) -> Option<AuthFailureHook> {
        self.on_auth_failure.read().clone()
    }
}

/// Connection parameters for the uplink.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    pub server_url: String,
    pub daemon_id: String,
    pub workspace: String,
    pub version: String,
}

/// The daemon's single logical connection to the control plane.
pub struct Uplink {
    batcher: Arc<Batcher>,
    token: Arc<parking_lot::RwLock<String>>,
    hooks: Arc<HookSlots>,
    shutdown: CancellationToken,
    commands_rx: parking_lot::Mutex<Option<mpsc::Receiver<Value>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Uplink {
    /// Register with the control plane, open the command subscription, and
    /// start the outbound batcher.
    pub async fn connect(config: UplinkConfig, access_token: String) -> Result<Arc<Self>, ConnectError> {
        let http = Arc::new(HttpClient::new(&config.server_url, &config.daemon_id));
        http.register(&access_token, &config.workspace, &config.version).await?;

        let ws_url = http.commands_ws_url(&access_token);
        let first = subscribe::connect(&ws_url)
            .await
            .map_err(|e| ConnectError::Transport(e.context("command subscription")))?;

        let token = Arc::new(parking_lot::RwLock::new(access_token));
        let hooks = Arc::new(HookSlots::default());
        let shutdown = CancellationToken::new();
        let batcher = Arc::new(Batcher::new());
        let (command_tx, commands_rx) = mpsc::channel(256);

        let reader = tokio::spawn(subscribe::run_reader(
            first,
            subscribe::ReaderContext {
                http: Arc::clone(&http),
                token: Arc::clone(&token),
                command_tx,
                hooks: Arc::clone(&hooks),
                shutdown: shutdown.clone(),
            },
        ));

        let flusher = tokio::spawn(run_flusher(
            Arc::clone(&batcher),
            Arc::clone(&http),
            Arc::clone(&token),
            shutdown.clone(),
        ));

        Ok(Arc::new(Self {
            batcher,
            token,
            hooks,
            shutdown,
            commands_rx: parking_lot::Mutex::new(Some(commands_rx)),
            tasks: parking_lot::Mutex::new(vec![reader, flusher]),
        }))
    }

    /// Take the inbound command stream. Yields exactly once; the receiver
    /// closes only when the uplink is permanently stopped — reconnects are
    /// invisible to the consumer.
    pub fn commands(&self) -> Option<mpsc::Receiver<Value>> {
        self.commands_rx.lock().take()
    }

    /// Enqueue one serialized message. Never blocks; backpressure sheds
    /// lower tiers inside the batcher.
    pub fn send(&self, payload: Vec<u8>, class: MessageClass) {
        self.batcher.enqueue(payload, class);
    }

    /// Replace the access token used for batches and reconnects.
    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    pub fn set_on_reconnect(&self, hook: ReconnectHook) {
        *self.hooks.on_reconnect.write() = Some(hook);
    }

    pub fn set_on_auth_failure(&self, hook: AuthFailureHook) {
        *self.hooks.on_auth_failure.write() = Some(hook);
    }

    /// Flush the batcher, close the subscription, and return within `d`.
    pub async fn close_with_timeout(&self, d: Duration) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let joined = tokio::time::timeout(d, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;
        if joined.is_err() {
            debug!("uplink close deadline reached before tasks finished");
        }
    }
}

/// Periodic flusher: drains the batcher on a short timer, on byte-threshold
/// wakeups, and once more on shutdown. Failed deliveries are requeued at
/// the front so ordering within tiers survives transient outages.
async fn run_flusher(
    batcher: Arc<Batcher>,
    http: Arc<HttpClient>,
    token: Arc<parking_lot::RwLock<String>>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                flush_once(&batcher, &http, &token, false).await;
                return;
            }
            _ = interval.tick() => {}
            _ = batcher.wake.notified() => {}
        }
        flush_once(&batcher, &http, &token, true).await;
    }
}

async fn flush_once(
    batcher: &Batcher,
    http: &HttpClient,
    token: &parking_lot::RwLock<String>,
    requeue_on_failure: bool,
) {
    let batch = batcher.drain();
    if batch.is_empty() {
        return;
    }
    let bearer = token.read().clone();
    if let Err(e) = http.post_batch(&bearer, &batch).await {
        debug!(err = %e, messages = batch.len(), "batch delivery failed");
        if requeue_on_failure {
            batcher.requeue_front(batch);
        }
    }
}
