// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inactivity tracking for PRD sessions: per-session activity clocks and
//! the periodic checker that emits warnings and expires idle sessions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::SessionManager;
use crate::protocol::Outbound;

/// Per-session activity clock.
///
/// Guarded by its own mutex, independent of the session table, so message
/// handling never contends with the checker's table scan.
pub struct Activity {
    inner: parking_lot::Mutex<ActivityState>,
}

struct ActivityState {
    last_active: Instant,
    /// Warning thresholds already signalled since the last reset.
    warned: HashSet<u64>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(ActivityState {
                last_active: Instant::now(),
                warned: HashSet::new(),
            }),
        }
    }

    /// Record activity: resets the clock and re-arms all warnings.
    pub fn touch(&self) {
        let mut state = self.inner.lock();
        state.last_active = Instant::now();
        state.warned.clear();
    }

    pub fn idle_for(&self) -> Duration {
        self.inner.lock().last_active.elapsed()
    }

    /// Mark a threshold as signalled; true when it was not already.
    pub fn mark_warned(&self, threshold: Duration) -> bool {
        self.inner.lock().warned.insert(threshold.as_secs())
    }

    /// Shift `last_active` into the past. Test hook.
    pub fn backdate(&self, by: Duration) {
        let mut state = self.inner.lock();
        if let Some(earlier) = state.last_active.checked_sub(by) {
            state.last_active = earlier;
        }
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Session timing knobs, configurable so tests run in milliseconds.
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    /// Inactivity after which a session is expired.
    pub timeout: Duration,
    /// Checker wake interval.
    pub check_interval: Duration,
    /// Warning thresholds, ascending, each below `timeout`.
    pub warnings: Vec<Duration>,
    /// Delay before the initial message is written to a fresh PTY.
    pub settle_delay: Duration,
    /// Grace between closing input and killing on expiry.
    pub expire_grace: Duration,
}

impl SessionTimeouts {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            timeout: config.session_timeout(),
            check_interval: config.session_check_interval(),
            warnings: config.warning_thresholds(),
            settle_delay: Duration::from_millis(500),
            expire_grace: Duration::from_secs(2),
        }
    }
}

/// Run the inactivity checker until the manager's ticker is cancelled.
///
/// One pass per `check_interval`: emit at most one warning per crossed
/// threshold per session, then expire sessions idle past the timeout.
pub(super) async fn run_checker(manager: Arc<SessionManager>) {
    let ticker = manager.ticker.clone();
    let mut interval = tokio::time::interval(manager.timeouts.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.cancelled() => return,
            _ = interval.tick() => {}
        }

        for entry in manager.entries().await {
            let idle = entry.activity.idle_for();

            if idle >= manager.timeouts.timeout {
                // The entry stays in the table until its child is reaped,
                // so later passes must not expire it a second time.
                if entry.expiring.swap(true, std::sync::atomic::Ordering::AcqRel) {
                    continue;
                }
                info!(session_id = %entry.session_id, "session expired after inactivity");
                let expired = Arc::clone(&entry);
                let mgr = Arc::clone(&manager);
                tokio::spawn(async move {
                    mgr.expire(&expired).await;
                });
                continue;
            }

            for threshold in &manager.timeouts.warnings {
                if idle >= *threshold && entry.activity.mark_warned(*threshold) {
                    let remaining = manager.timeouts.timeout.saturating_sub(*threshold);
                    let minutes_remaining = (remaining.as_secs() + 59) / 60;
                    debug!(
                        session_id = %entry.session_id,
                        minutes_remaining,
                        "session inactivity warning"
                    );
                    let _ = manager.sender.send(&Outbound::SessionTimeoutWarning {
                        session_id: entry.session_id.clone(),
                        minutes_remaining,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "timeout_tests.rs"]
mod tests;
