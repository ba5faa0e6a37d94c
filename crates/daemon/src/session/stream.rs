// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classification of the agent's stream-json stdout lines.

use serde_json::Value;

/// What to do with one stdout line from the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine {
    /// Assistant text to forward as `prd_output`.
    AssistantText(String),
    /// Valid JSON we do not surface (tool events, system frames, results).
    Skip,
    /// Not JSON at all; forwarded verbatim.
    Verbatim(String),
}

/// Classify one line of agent stdout.
pub fn classify_line(line: &str) -> StreamLine {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return StreamLine::Skip;
    }

    let json: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return StreamLine::Verbatim(trimmed.to_owned()),
    };

    match extract_assistant_text(&json) {
        Some(text) => StreamLine::AssistantText(text),
        None => StreamLine::Skip,
    }
}

/// Extract concatenated `type: "text"` blocks from an assistant entry.
///
/// Returns `None` for non-assistant entries and for assistant messages with
/// no text blocks.
pub fn extract_assistant_text(json: &Value) -> Option<String> {
    if json.get("type").and_then(|v| v.as_str()) != Some("assistant") {
        return None;
    }
    let content = json.get("message")?.get("content")?.as_array()?;
    let texts: Vec<&str> = content
        .iter()
        .filter(|b| b.get("type").and_then(|v| v.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|v| v.as_str()))
        .collect();
    if texts.is_empty() {
        return None;
    }
    Some(texts.join("\n"))
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
