// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::{classify_line, StreamLine};

#[yare::parameterized(
    assistant_text = {
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Here is the draft."}]}}"#,
        StreamLine::AssistantText("Here is the draft.".to_owned())
    },
    assistant_tool_use = {
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Write","input":{}}]}}"#,
        StreamLine::Skip
    },
    system_frame = {
        r#"{"type":"system","subtype":"init"}"#,
        StreamLine::Skip
    },
    result_frame = {
        r#"{"type":"result","subtype":"success","result":"done"}"#,
        StreamLine::Skip
    },
    non_json = {
        "warning: something odd happened",
        StreamLine::Verbatim("warning: something odd happened".to_owned())
    },
    blank = { "   ", StreamLine::Skip },
)]
fn classification(line: &str, expected: StreamLine) {
    assert_eq!(classify_line(line), expected);
}

#[test]
fn multiple_text_blocks_join_with_newline() {
    let line = json!({
        "type": "assistant",
        "message": { "content": [
            { "type": "text", "text": "first" },
            { "type": "thinking", "thinking": "hmm" },
            { "type": "text", "text": "second" }
        ]}
    })
    .to_string();
    assert_eq!(
        classify_line(&line),
        StreamLine::AssistantText("first\nsecond".to_owned())
    );
}

#[test]
fn trailing_whitespace_is_stripped_from_verbatim() {
    assert_eq!(
        classify_line("plain output\n"),
        StreamLine::Verbatim("plain output".to_owned())
    );
}
