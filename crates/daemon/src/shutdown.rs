// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinated teardown. The whole sequence is bounded by a hard deadline
//! so a wedged child can never keep the daemon alive past it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::run::RunManager;
use crate::session::SessionManager;
use crate::uplink::Uplink;
use crate::workspace::watcher::WorkspaceWatcher;

/// Hard ceiling for the whole sequence.
pub const TOTAL_DEADLINE: Duration = Duration::from_secs(10);
/// How long children get to exit cleanly before SIGKILL.
pub const CHILD_GRACE: Duration = Duration::from_secs(5);
/// Sub-deadline for the final uplink flush + close.
pub const UPLINK_CLOSE: Duration = Duration::from_secs(5);

/// Run the shutdown sequence, in order: interrupted stories are persisted,
/// runs stop, sessions die (the session manager stops its own timeout
/// ticker), the engine tears down, the file watcher is closed and awaited
/// so nothing can enqueue behind the snapshot of the world being flushed,
/// and the uplink closes last so terminal messages still go out.
pub async fn run(
    runs: Arc<RunManager>,
    sessions: Arc<SessionManager>,
    watcher: Option<Arc<WorkspaceWatcher>>,
    uplink: Arc<Uplink>,
) {
    info!("shutdown sequence started");

    let sequence = async {
        runs.mark_interrupted_stories().await;
        runs.halt_all().await;
        sessions.kill_all(CHILD_GRACE).await;
        runs.engine_stop_all();
        if let Some(ref watcher) = watcher {
            watcher.close().await;
        }
        uplink.close_with_timeout(UPLINK_CLOSE).await;
    };

    if tokio::time::timeout(TOTAL_DEADLINE, sequence).await.is_err() {
        warn!("shutdown deadline reached with work outstanding");
    } else {
        info!("shutdown complete");
    }
}
