// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon assembly — shared by `main` and the end-to-end tests.
//!
//! Builds the root context (scanner, watcher, session and run managers,
//! uplink, dispatcher), wires the reconnect and auth-failure hooks, and
//! runs until a signal, a completed update, or permanent uplink loss.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::credentials::{self, TokenRefresher};
use crate::dispatch::Dispatcher;
use crate::ratelimit::RateLimiter;
use crate::run::subprocess::SubprocessEngine;
use crate::run::RunManager;
use crate::sender::{OutboundSender, Sender};
use crate::session::timeout::SessionTimeouts;
use crate::session::SessionManager;
use crate::snapshot::push_state_snapshot;
use crate::update::FeedUpdater;
use crate::uplink::{ConnectError, Uplink, UplinkConfig};
use crate::workspace::convert::ChecklistConverter;
use crate::workspace::scanner::Scanner;
use crate::workspace::watcher::WorkspaceWatcher;
use crate::shutdown;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / CHIEF_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("CHIEF_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Stable-enough daemon identity: hostname plus workspace basename.
fn daemon_id(config: &Config) -> String {
    let host = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "workstation".to_owned());
    let workspace = config
        .workspace
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workspace");
    format!("{host}:{workspace}")
}

/// Run the daemon to completion. Returns only after graceful shutdown;
/// startup failures (credentials, auth, transport) are errors.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let creds_path = config.credentials_path();
    let creds = credentials::load(&creds_path).with_context(|| {
        format!("no credentials at {} — run `chief login` first", creds_path.display())
    })?;
    let refresher = Arc::new(TokenRefresher::new(&config.server_url, creds_path.clone()));

    let uplink_config = UplinkConfig {
        server_url: config.server_url.clone(),
        daemon_id: daemon_id(&config),
        workspace: config.workspace.to_string_lossy().into_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    };

    // Connect; one refresh attempt when the stored token is stale.
    let uplink = match Uplink::connect(uplink_config.clone(), creds.access_token).await {
        Ok(uplink) => uplink,
        Err(ConnectError::AuthFailed(detail)) => {
            warn!(%detail, "stored token rejected, refreshing");
            let fresh = refresher.refresh().await.context("token refresh failed")?;
            match Uplink::connect(uplink_config, fresh).await {
                Ok(uplink) => uplink,
                Err(e) => return Err(anyhow::Error::new(e).context("uplink connect")),
            }
        }
        Err(e) => return Err(anyhow::Error::new(e).context("uplink connect")),
    };
    info!(server = %config.server_url, "uplink connected");

    let shutdown_token = CancellationToken::new();
    let sender: Arc<dyn OutboundSender> = Arc::new(Sender::new(Arc::clone(&uplink)));
    let limiter = Arc::new(RateLimiter::new());

    let scanner = Arc::new(Scanner::new(config.workspace.clone(), config.scan_interval()));
    scanner.attach_sender(Arc::clone(&sender));

    let engine = SubprocessEngine::new(config.engine_binary.clone());
    let runs = RunManager::new(engine, Arc::clone(&sender));
    let sessions = SessionManager::new(
        config.agent_binary(),
        SessionTimeouts::from_config(&config),
        Arc::clone(&sender),
        Arc::new(ChecklistConverter),
    );

    // The watcher owns its own stop token; the shutdown coordinator closes
    // it at the right point in the sequence.
    let watcher = WorkspaceWatcher::new(Arc::clone(&scanner), Arc::clone(&sender));
    let watcher = match watcher.spawn() {
        Ok(()) => Some(watcher),
        Err(e) => {
            warn!(err = %e, "file watcher unavailable, continuing with periodic scans only");
            None
        }
    };

    // Auth-failure hook: refresh-token exchange, then the uplink retries
    // with the new token.
    {
        let refresher = Arc::clone(&refresher);
        uplink.set_on_auth_failure(Arc::new(move || {
            let refresher = Arc::clone(&refresher);
            Box::pin(async move { refresher.refresh().await })
        }));
    }

    // Reconnect hook: reset rate limits and replay full state before any
    // post-reconnect message.
    {
        let scanner = Arc::clone(&scanner);
        let runs = Arc::clone(&runs);
        let sessions = Arc::clone(&sessions);
        let sender = Arc::clone(&sender);
        let limiter = Arc::clone(&limiter);
        uplink.set_on_reconnect(Arc::new(move || {
            let scanner = Arc::clone(&scanner);
            let runs = Arc::clone(&runs);
            let sessions = Arc::clone(&sessions);
            let sender = Arc::clone(&sender);
            let limiter = Arc::clone(&limiter);
            Box::pin(async move {
                limiter.reset();
                // Silent rescan: the snapshot must be the first message out,
                // so no project_list emission here.
                scanner.rescan();
                if let Err(e) =
                    push_state_snapshot(&scanner, &runs, &sessions, sender.as_ref()).await
                {
                    warn!(err = %e, "reconnect snapshot failed");
                }
            })
        }));
    }

    // First scan (silent) and the initial snapshot: nothing may precede
    // the snapshot on the wire.
    scanner.rescan();
    if let Err(e) = push_state_snapshot(&scanner, &runs, &sessions, sender.as_ref()).await {
        warn!(err = %e, "initial snapshot failed");
    }

    // Long-lived workers.
    {
        let scanner = Arc::clone(&scanner);
        let token = shutdown_token.clone();
        tokio::spawn(async move { scanner.run(token).await });
    }
    sessions.spawn_timeout_checker();
    runs.spawn_event_monitor(shutdown_token.clone());

    // Signal handler: first signal starts graceful shutdown, second forces.
    {
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => info!("received SIGTERM"),
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => info!("received SIGINT"),
            }
            token.cancel();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => info!("received SIGTERM again, forcing exit"),
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => info!("received SIGINT again, forcing exit"),
            }
            std::process::exit(130);
        });
    }

    // Dispatcher over the command stream.
    let commands = uplink
        .commands()
        .ok_or_else(|| anyhow::anyhow!("command stream already taken"))?;
    let dispatcher = Arc::new(Dispatcher {
        scanner,
        watcher: watcher.clone(),
        sessions: Arc::clone(&sessions),
        runs: Arc::clone(&runs),
        sender,
        limiter,
        updater: Arc::new(FeedUpdater::new(config.release_feed.clone())),
        current_version: env!("CARGO_PKG_VERSION").to_owned(),
        shutdown: shutdown_token.clone(),
    });
    let mut dispatch_handle = tokio::spawn(dispatcher.run(commands));

    // Run until shutdown begins or the uplink closes permanently.
    let mut uplink_lost = false;
    tokio::select! {
        _ = shutdown_token.cancelled() => {}
        result = &mut dispatch_handle => {
            if let Err(e) = result {
                error!(err = %e, "dispatcher task failed");
            }
            info!("uplink closed, shutting down");
            uplink_lost = true;
            shutdown_token.cancel();
        }
    }

    shutdown::run(runs, sessions, watcher, uplink).await;

    if uplink_lost {
        anyhow::bail!("uplink closed permanently");
    }
    Ok(())
}
