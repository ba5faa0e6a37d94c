// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::Value;

use super::{classify, stamp};
use crate::protocol::Outbound;
use crate::uplink::MessageClass;

#[yare::parameterized(
    claude_output = { "claude_output", MessageClass::Stream },
    prd_output = { "prd_output", MessageClass::Stream },
    run_progress = { "run_progress", MessageClass::Progress },
    diff = { "diff", MessageClass::Progress },
    clone_progress = { "clone_progress", MessageClass::Progress },
    project_list = { "project_list", MessageClass::Progress },
    state_snapshot = { "state_snapshot", MessageClass::Control },
    error = { "error", MessageClass::Control },
    run_complete = { "run_complete", MessageClass::Control },
    session_expired = { "session_expired", MessageClass::Control },
    quota_exhausted = { "quota_exhausted", MessageClass::Control },
    unknown_future_type = { "telemetry_blob", MessageClass::Control },
)]
fn classification(kind: &str, expected: MessageClass) {
    assert_eq!(classify(kind), expected);
}

#[test]
fn stamp_adds_id_and_timestamp() {
    let msg = Outbound::Pong;
    let (kind, bytes) = stamp(&msg).unwrap();
    assert_eq!(kind, "pong");

    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["type"], "pong");
    assert!(value["id"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(value["timestamp"].as_str().is_some_and(|s| s.ends_with('Z')));
}

#[test]
fn stamp_preserves_domain_fields() {
    let msg = Outbound::PrdOutput {
        content: "drafting".to_owned(),
        session_id: "s1".to_owned(),
        project: "web".to_owned(),
    };
    let (kind, bytes) = stamp(&msg).unwrap();
    assert_eq!(kind, "prd_output");
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["content"], "drafting");
    assert_eq!(value["session_id"], "s1");
    assert_eq!(value["project"], "web");
}
