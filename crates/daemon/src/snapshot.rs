// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Full-state snapshot pushed on every (re)connect so the control plane
//! can reconcile its view.

use crate::protocol::Outbound;
use crate::run::RunManager;
use crate::sender::OutboundSender;
use crate::session::SessionManager;
use crate::workspace::scanner::Scanner;

/// Build and enqueue one `state_snapshot`. The snapshot rides the control
/// tier, so it is ordered ahead of anything produced afterwards.
pub async fn push_state_snapshot(
    scanner: &Scanner,
    runs: &RunManager,
    sessions: &SessionManager,
    sender: &dyn OutboundSender,
) -> anyhow::Result<()> {
    sender.send(&Outbound::StateSnapshot {
        projects: scanner.projects(),
        runs: runs.snapshot().await,
        sessions: sessions.snapshot().await,
    })
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
