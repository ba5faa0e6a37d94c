// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound side of the uplink: the server-push command subscription with
//! exponential-backoff reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::http::HttpClient;
use super::HookSlots;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Initial backoff for reconnection attempts.
const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
/// Maximum backoff for reconnection attempts.
const RECONNECT_MAX: Duration = Duration::from_secs(30);

pub(crate) async fn connect(ws_url: &str) -> anyhow::Result<WsStream> {
    let (ws, _) = tokio_tungstenite::connect_async(ws_url).await?;
    Ok(ws)
}

enum StreamEnd {
    Shutdown,
    AuthFailed,
    Disconnected,
}

/// Everything the reader task needs across reconnects.
pub(crate) struct ReaderContext {
    pub http: Arc<HttpClient>,
    pub token: Arc<parking_lot::RwLock<String>>,
    pub command_tx: mpsc::Sender<Value>,
    pub hooks: Arc<HookSlots>,
    pub shutdown: CancellationToken,
}

/// Run the subscription until shutdown or permanent failure.
///
/// `first` is the socket established during `Uplink::connect`; losing it
/// enters the backoff loop. On every successful reconnect the
/// `on_reconnect` hook runs to completion BEFORE command delivery resumes,
/// so the daemon's state snapshot is enqueued ahead of any reply produced
/// for a post-reconnect command. Dropping `command_tx` on return is what
/// closes the dispatcher's command stream.
pub(crate) async fn run_reader(first: WsStream, ctx: ReaderContext) {
    let mut pending = Some(first);
    let mut backoff = RECONNECT_INITIAL;
    let mut first_connection = true;

    loop {
        if ctx.shutdown.is_cancelled() {
            return;
        }

        let ws = match pending.take() {
            Some(ws) => ws,
            None => {
                let url = {
                    let token = ctx.token.read().clone();
                    ctx.http.commands_ws_url(&token)
                };
                match connect(&url).await {
                    Ok(ws) => {
                        backoff = RECONNECT_INITIAL;
                        ws
                    }
                    Err(e) => {
                        warn!(err = %e, "command subscription connect failed");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = ctx.shutdown.cancelled() => return,
                        }
                        backoff = (backoff * 2).min(RECONNECT_MAX);
                        continue;
                    }
                }
            }
        };

        if !first_connection {
            info!("command subscription re-established");
            let hook = ctx.hooks.reconnect_hook();
            if let Some(hook) = hook {
                hook().await;
            }
        }
        first_connection = false;

        match stream_commands(ws, &ctx).await {
            StreamEnd::Shutdown => return,
            StreamEnd::Disconnected => {
                warn!("command subscription lost");
            }
            StreamEnd::AuthFailed => {
                let hook = ctx.hooks.auth_failure_hook();
                let Some(hook) = hook else {
                    error!("server rejected credentials and no refresh hook is set");
                    return;
                };
                match hook().await {
                    Ok(fresh) => {
                        *ctx.token.write() = fresh;
                        info!("credentials refreshed, reconnecting");
                        continue;
                    }
                    Err(e) => {
                        error!(err = %e, "credential refresh failed, uplink closing");
                        return;
                    }
                }
            }
        }
    }
}

/// Forward commands from one socket until it ends.
async fn stream_commands(mut ws: WsStream, ctx: &ReaderContext) -> StreamEnd {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => return StreamEnd::Shutdown,

            msg = ws.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        debug!(err = %e, "ws read error");
                        return StreamEnd::Disconnected;
                    }
                    None => return StreamEnd::Disconnected,
                };

                match msg {
                    Message::Text(text) => {
                        let value: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(e) => {
                                debug!(err = %e, "discarding non-JSON command frame");
                                continue;
                            }
                        };
                        if value.get("type").and_then(Value::as_str) == Some("auth_failed") {
                            return StreamEnd::AuthFailed;
                        }
                        if ctx.command_tx.send(value).await.is_err() {
                            // Dispatcher gone — nothing left to deliver to.
                            return StreamEnd::Shutdown;
                        }
                    }
                    Message::Close(_) => return StreamEnd::Disconnected,
                    _ => {}
                }
            }
        }
    }
}
