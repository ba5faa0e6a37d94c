// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound adapter between domain code and the uplink batcher: marshals a
//! message, stamps `id`/`timestamp`, and classifies it by `type`.

use std::sync::Arc;

use serde_json::Value;

use crate::protocol::{now_rfc3339, Outbound};
use crate::uplink::{MessageClass, Uplink};

/// Seam used by managers so tests can capture outbound traffic.
pub trait OutboundSender: Send + Sync {
    /// Marshal and enqueue one message. Enqueue itself is fire-and-forget;
    /// only marshalling can fail.
    fn send(&self, msg: &Outbound) -> anyhow::Result<()>;
}

/// Map an outbound `type` to its batching tier.
///
/// Control messages are never dropped; stream text is the first to go
/// under backpressure.
pub fn classify(kind: &str) -> MessageClass {
    match kind {
        "claude_output" | "prd_output" => MessageClass::Stream,
        "run_progress" | "diff" | "diffs_response" | "clone_progress" | "project_list"
        | "project_state" | "prds_response" | "prd_content" | "log_lines" | "settings" => {
            MessageClass::Progress
        }
        _ => MessageClass::Control,
    }
}

/// Production sender that feeds the uplink batcher.
pub struct Sender {
    uplink: Arc<Uplink>,
}

impl Sender {
    pub fn new(uplink: Arc<Uplink>) -> Self {
        Self { uplink }
    }
}

impl OutboundSender for Sender {
    fn send(&self, msg: &Outbound) -> anyhow::Result<()> {
        let (kind, payload) = stamp(msg)?;
        self.uplink.send(payload, classify(&kind));
        Ok(())
    }
}

/// Serialize a message with `id` and `timestamp` stamped in, returning its
/// wire `type` alongside the bytes.
pub fn stamp(msg: &Outbound) -> anyhow::Result<(String, Vec<u8>)> {
    let mut value = serde_json::to_value(msg)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default();

    if let Value::Object(ref mut map) = value {
        map.insert("id".to_owned(), Value::String(uuid::Uuid::new_v4().to_string()));
        map.insert("timestamp".to_owned(), Value::String(now_rfc3339()));
    }

    Ok((kind, serde_json::to_vec(&value)?))
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
