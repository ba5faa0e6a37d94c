// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{Duration, Instant};

use super::{format_retry_after, RateLimiter};

#[test]
fn allows_until_bucket_empties() {
    let limiter = RateLimiter::new();
    let now = Instant::now();
    for _ in 0..2 {
        assert!(limiter.allow_at("clone_repo", now).allowed);
    }
    let denied = limiter.allow_at("clone_repo", now);
    assert!(!denied.allowed);
    assert!(denied.retry_after > Duration::ZERO);
}

#[test]
fn refills_over_time() {
    let limiter = RateLimiter::new();
    let start = Instant::now();
    for _ in 0..2 {
        assert!(limiter.allow_at("clone_repo", start).allowed);
    }
    assert!(!limiter.allow_at("clone_repo", start).allowed);

    // clone_repo refills at 0.05/s — one token back after 20s.
    let later = start + Duration::from_secs(21);
    assert!(limiter.allow_at("clone_repo", later).allowed);
}

#[test]
fn unknown_types_share_the_default_bucket_shape() {
    let limiter = RateLimiter::new();
    let now = Instant::now();
    for _ in 0..10 {
        assert!(limiter.allow_at("some_future_command", now).allowed);
    }
    assert!(!limiter.allow_at("some_future_command", now).allowed);
    // A different unknown type has its own bucket.
    assert!(limiter.allow_at("another_command", now).allowed);
}

#[test]
fn reset_refills_everything() {
    let limiter = RateLimiter::new();
    let now = Instant::now();
    while limiter.allow_at("start_run", now).allowed {}
    limiter.reset();
    assert!(limiter.allow_at("start_run", now).allowed);
}

#[test]
fn denied_retry_after_shrinks_as_time_passes() {
    let limiter = RateLimiter::new();
    let now = Instant::now();
    while limiter.allow_at("start_run", now).allowed {}
    let first = limiter.allow_at("start_run", now).retry_after;
    let second = limiter.allow_at("start_run", now + Duration::from_millis(500)).retry_after;
    assert!(second < first, "{second:?} vs {first:?}");
}

#[yare::parameterized(
    sub_second = { Duration::from_millis(400), "retry in 400ms" },
    one_second = { Duration::from_secs(1), "retry in 1s" },
    rounds_up = { Duration::from_millis(2100), "retry in 3s" },
)]
fn retry_after_formatting(d: Duration, expected: &str) {
    assert_eq!(format_retry_after(d), expected);
}
