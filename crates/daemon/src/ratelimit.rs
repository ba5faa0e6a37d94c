// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-bucket admission control for inbound commands, one bucket per
//! command type. Buckets are reset to full on every uplink reconnect.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// How long until a token is available again. Zero when allowed.
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Limit {
    capacity: f64,
    refill_per_sec: f64,
}

/// Static per-type limits. Unknown types share `DEFAULT`.
fn limit_for(kind: &str) -> Limit {
    match kind {
        "ping" => Limit { capacity: 10.0, refill_per_sec: 2.0 },
        "prd_message" => Limit { capacity: 30.0, refill_per_sec: 2.0 },
        "list_projects" | "get_project" | "get_prds" | "get_prd" => {
            Limit { capacity: 10.0, refill_per_sec: 1.0 }
        }
        "get_logs" | "get_diff" | "get_diffs" => Limit { capacity: 10.0, refill_per_sec: 1.0 },
        "start_run" | "pause_run" | "resume_run" | "stop_run" => {
            Limit { capacity: 5.0, refill_per_sec: 0.5 }
        }
        "new_prd" | "refine_prd" => Limit { capacity: 5.0, refill_per_sec: 0.2 },
        "clone_repo" => Limit { capacity: 2.0, refill_per_sec: 0.05 },
        _ => DEFAULT,
    }
}

const DEFAULT: Limit = Limit { capacity: 10.0, refill_per_sec: 0.5 };

struct Bucket {
    limit: Limit,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(limit: Limit, now: Instant) -> Self {
        Self { limit, tokens: limit.capacity, last_refill: now }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.limit.refill_per_sec).min(self.limit.capacity);
        self.last_refill = now;
    }
}

/// Per-command-type token buckets behind one small mutex.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { buckets: Mutex::new(HashMap::new()) }
    }

    /// Admit or deny one command of the given type.
    pub fn allow(&self, kind: &str) -> Decision {
        self.allow_at(kind, Instant::now())
    }

    /// Admission check with an injectable clock.
    pub fn allow_at(&self, kind: &str, now: Instant) -> Decision {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(kind.to_owned())
            .or_insert_with(|| Bucket::new(limit_for(kind), now));
        bucket.refill(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Decision { allowed: true, retry_after: Duration::ZERO };
        }

        let deficit = 1.0 - bucket.tokens;
        let retry_after = Duration::from_secs_f64(deficit / bucket.limit.refill_per_sec);
        Decision { allowed: false, retry_after }
    }

    /// Refill every bucket to capacity. Called on uplink reconnect so a
    /// fresh connection never inherits stale throttling.
    pub fn reset(&self) {
        self.buckets.lock().clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Human formatting for `RATE_LIMITED` error messages, e.g. `"retry in 3s"`.
pub fn format_retry_after(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("retry in {}ms", d.as_millis().max(1))
    } else {
        format!("retry in {}s", secs.ceil() as u64)
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
