// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use super::{parse_engine_event, SubprocessEngine};
use crate::run::engine::{Engine, EngineEventKind, RunSpec};
use crate::test_support::{fake_agent, TestWorkspace};

#[test]
fn parses_story_events() {
    let event = parse_engine_event(&json!({
        "key": "web/checkout",
        "event": "story_started",
        "story_id": "US-002",
        "iteration": 3
    }))
    .unwrap();
    assert_eq!(event.key, "web/checkout");
    match event.kind {
        EngineEventKind::StoryStarted { story_id, iteration } => {
            assert_eq!(story_id, "US-002");
            assert_eq!(iteration, 3);
        }
        other => panic!("wrong kind: {other:?}"),
    }
}

#[yare::parameterized(
    complete = { "complete" },
    max_iterations = { "max_iterations_reached" },
    quota = { "quota_exhausted" },
)]
fn parses_terminal_events(event: &str) {
    assert!(parse_engine_event(&json!({ "key": "k", "event": event })).is_some());
}

#[test]
fn rejects_events_without_key_or_kind() {
    assert!(parse_engine_event(&json!({ "event": "complete" })).is_none());
    assert!(parse_engine_event(&json!({ "key": "k" })).is_none());
    assert!(parse_engine_event(&json!({ "key": "k", "event": "telemetry" })).is_none());
}

#[tokio::test]
async fn start_streams_events_from_the_engine_binary() {
    let ws = TestWorkspace::new();
    // An "engine" that reads one command, then emits two events.
    let engine_bin = fake_agent(
        ws.path(),
        r#"read cmd
echo '{"key":"web/checkout","event":"story_started","story_id":"US-001","iteration":1}'
echo '{"key":"web/checkout","event":"complete"}'
cat > /dev/null"#,
    );

    let engine = SubprocessEngine::new(engine_bin.to_string_lossy().into_owned());
    let mut events = engine.subscribe();

    engine
        .start(RunSpec {
            key: "web/checkout".to_owned(),
            project: "web".to_owned(),
            project_path: ws.path().join("web"),
            prd_path: ws.path().join("web/.chief/prds/checkout/prd.json"),
        })
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no engine event")
        .unwrap();
    assert!(matches!(first.kind, EngineEventKind::StoryStarted { .. }));

    let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no second event")
        .unwrap();
    assert!(matches!(second.kind, EngineEventKind::Complete));

    engine.stop_all();
}

#[test]
fn missing_engine_binary_fails_start_only() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();

    let engine = SubprocessEngine::new("/nonexistent/chief-engine");
    let result = engine.start(RunSpec {
        key: "k".to_owned(),
        project: "p".to_owned(),
        project_path: "/tmp".into(),
        prd_path: "/tmp/prd.json".into(),
    });
    assert!(result.is_err());
}
