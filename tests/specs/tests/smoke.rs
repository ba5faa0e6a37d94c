// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: the real `chiefd` binary against the fake
//! control plane.

use std::process::Command;
use std::time::Duration;

use chief_specs::{spawn_daemon, write_script, FakeControlPlane};
use serde_json::{json, Value};

const TOKEN: &str = "test-token";
const DEADLINE: Duration = Duration::from_secs(15);

/// Fake agent CLI: consumes its PTY until EOF, then exits.
const QUIET_AGENT: &str = "cat > /dev/null\nexit 0";

fn first_type(messages: &[Value]) -> Option<&str> {
    messages.first().and_then(|m| m.get("type")).and_then(Value::as_str)
}

#[tokio::test]
async fn connect_pushes_snapshot_first() {
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let mut daemon = spawn_daemon(&plane.url, TOKEN, &[]).unwrap();
    daemon.seed_prd("web", "checkout", &[("US-001", true), ("US-002", false)]);

    let snapshot = plane.wait_for("state_snapshot", DEADLINE).await;
    assert!(snapshot.get("id").is_some());
    assert!(snapshot.get("timestamp").is_some());
    assert_eq!(snapshot["sessions"].as_array().unwrap().len(), 0);
    assert_eq!(snapshot["runs"].as_array().unwrap().len(), 0);

    // No non-snapshot message precedes the snapshot.
    assert_eq!(first_type(&plane.messages()), Some("state_snapshot"));
    assert_eq!(plane.register_calls(), 1);

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn stale_token_refreshes_and_connects() {
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let mut daemon = spawn_daemon(&plane.url, "expired-token", &[]).unwrap();

    plane.wait_for("state_snapshot", DEADLINE).await;
    assert!(plane.register_calls() >= 2, "expected a rejected then accepted register");
    assert_eq!(plane.refresh_calls(), 1);

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn ping_command_answers_pong() {
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let mut daemon = spawn_daemon(&plane.url, TOKEN, &[]).unwrap();
    plane.wait_for("state_snapshot", DEADLINE).await;

    plane.send_command(json!({ "type": "ping", "id": "req-1" }));
    plane.wait_for("pong", DEADLINE).await;

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn clone_succeeds_into_workspace() {
    // S1: local bare repo → clone_progress* then clone_complete{success}.
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let mut daemon = spawn_daemon(&plane.url, TOKEN, &[]).unwrap();
    plane.wait_for("state_snapshot", DEADLINE).await;

    let staging = tempfile::tempdir().unwrap();
    let seed = staging.path().join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    let git = |args: &[&str], cwd: &std::path::Path| {
        let out = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .env("GIT_AUTHOR_NAME", "t")
            .env("GIT_AUTHOR_EMAIL", "t@t")
            .env("GIT_COMMITTER_NAME", "t")
            .env("GIT_COMMITTER_EMAIL", "t@t")
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {out:?}");
    };
    git(&["init", "-q"], &seed);
    std::fs::write(seed.join("README.md"), "hello\n").unwrap();
    git(&["add", "."], &seed);
    git(&["commit", "-q", "-m", "initial"], &seed);
    let bare = staging.path().join("widget.git");
    git(&["clone", "-q", "--bare", seed.to_str().unwrap(), bare.to_str().unwrap()], staging.path());

    plane.send_command(json!({
        "type": "clone_repo",
        "id": "req-clone",
        "url": bare.to_string_lossy(),
    }));

    let complete = plane.wait_for("clone_complete", DEADLINE).await;
    assert_eq!(complete["success"], true);
    assert_eq!(complete["project"], "widget");
    assert!(daemon.workspace_path().join("widget").join(".git").exists());

    // Cloning again into the same directory fails without side effects.
    plane.send_command(json!({
        "type": "clone_repo",
        "id": "req-clone-2",
        "url": bare.to_string_lossy(),
    }));
    let error = plane.wait_for("error", DEADLINE).await;
    assert_eq!(error["code"], chief::error::ErrorCode::CloneFailed.as_str());
    assert_eq!(error["request_id"], "req-clone-2");

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn start_run_twice_reports_run_already_active() {
    // S3: the second start_run for the same key errors.
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let staging = tempfile::tempdir().unwrap();
    let engine = write_script(staging.path(), "fake-engine", "cat > /dev/null");
    let mut daemon = spawn_daemon(
        &plane.url,
        TOKEN,
        &[("CHIEF_ENGINE_BINARY", engine.to_str().unwrap())],
    )
    .unwrap();
    daemon.seed_prd("web", "checkout", &[("US-001", false)]);
    plane.wait_for("state_snapshot", DEADLINE).await;

    plane.send_command(json!({
        "type": "start_run", "id": "req-1", "project": "web", "prd_id": "checkout"
    }));
    plane.send_command(json!({
        "type": "start_run", "id": "req-2", "project": "web", "prd_id": "checkout"
    }));

    let error = plane.wait_for("error", DEADLINE).await;
    assert_eq!(error["code"], chief::error::ErrorCode::RunAlreadyActive.as_str());
    assert_eq!(error["request_id"], "req-2");

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn run_events_stream_and_land_in_story_logs() {
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let staging = tempfile::tempdir().unwrap();
    // Engine: on the first command, emit a story lifecycle then idle.
    let engine = write_script(
        staging.path(),
        "fake-engine",
        r#"read cmd
echo '{"key":"web/checkout","event":"story_started","story_id":"US-001","iteration":1}'
echo '{"key":"web/checkout","event":"assistant_text","text":"working on US-001"}'
echo '{"key":"web/checkout","event":"complete"}'
cat > /dev/null"#,
    );
    let mut daemon = spawn_daemon(
        &plane.url,
        TOKEN,
        &[("CHIEF_ENGINE_BINARY", engine.to_str().unwrap())],
    )
    .unwrap();
    let project = daemon.seed_prd("web", "checkout", &[("US-001", false)]);
    plane.wait_for("state_snapshot", DEADLINE).await;

    plane.send_command(json!({
        "type": "start_run", "id": "req-1", "project": "web", "prd_id": "checkout"
    }));

    // story_started precedes the story's stream output, which precedes
    // run_complete.
    let progress = plane.wait_for("run_progress", DEADLINE).await;
    assert_eq!(progress["status"], "story_started");
    assert_eq!(progress["story_id"], "US-001");

    let output = plane.wait_for("claude_output", DEADLINE).await;
    assert_eq!(output["data"], "working on US-001");

    plane.wait_for("run_complete", DEADLINE).await;

    let log = project.join(".chief/prds/checkout/logs/US-001.log");
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "working on US-001\n");

    // story_started rides the progress tier and is flushed ahead of the
    // story's stream bytes. Stream text vs. run_complete is cross-tier and
    // deliberately not ordered, so no assertion there.
    let messages = plane.messages();
    let index_of = |kind: &str| {
        messages
            .iter()
            .position(|m| m.get("type").and_then(Value::as_str) == Some(kind))
            .unwrap_or(usize::MAX)
    };
    assert!(index_of("run_progress") < index_of("claude_output"));

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn idle_session_expires_and_leaves_the_snapshot() {
    // S4 with second-granularity config: a session nobody touches expires.
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let staging = tempfile::tempdir().unwrap();
    let agent = write_script(staging.path(), "fake-agent", QUIET_AGENT);
    let mut daemon = spawn_daemon(
        &plane.url,
        TOKEN,
        &[
            ("CHIEF_CLAUDE_BINARY", agent.to_str().unwrap()),
            ("CHIEF_SESSION_TIMEOUT", "1"),
            ("CHIEF_SESSION_CHECK_INTERVAL", "1"),
            ("CHIEF_SESSION_WARNINGS", ""),
        ],
    )
    .unwrap();
    daemon.seed_prd("web", "checkout", &[("US-001", false)]);
    plane.wait_for("state_snapshot", DEADLINE).await;

    plane.send_command(json!({
        "type": "new_prd", "id": "req-1",
        "project": "web", "session_id": "sess-1", "message": "draft a prd"
    }));

    let expired = plane.wait_for("session_expired", DEADLINE).await;
    assert_eq!(expired["session_id"], "sess-1");
    assert_eq!(plane.of_type("session_expired").len(), 1);

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn reconnect_replays_snapshot_before_new_replies() {
    // S6: drop the subscription mid-run; the first outbound message after
    // reconnect is a state_snapshot that still shows the run as running.
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let staging = tempfile::tempdir().unwrap();
    let engine = write_script(staging.path(), "fake-engine", "cat > /dev/null");
    let mut daemon = spawn_daemon(
        &plane.url,
        TOKEN,
        &[("CHIEF_ENGINE_BINARY", engine.to_str().unwrap())],
    )
    .unwrap();
    daemon.seed_prd("web", "checkout", &[("US-001", false)]);
    plane.wait_for("state_snapshot", DEADLINE).await;

    plane.send_command(json!({
        "type": "start_run", "id": "req-1", "project": "web", "prd_id": "checkout"
    }));
    // Let the run register before cutting the link.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mark = plane.message_count();
    plane.drop_subscriptions();

    // Second snapshot arrives on reconnect, carrying the live run.
    let snapshot = plane.wait_for_nth("state_snapshot", 1, DEADLINE).await;
    assert_eq!(snapshot["runs"][0]["state"], "running");
    assert_eq!(snapshot["runs"][0]["prd_id"], "checkout");

    // A command sent after reconnection is answered after the snapshot.
    plane.send_command(json!({ "type": "ping", "id": "req-2" }));
    plane.wait_for("pong", DEADLINE).await;
    let after = plane.messages_after(mark);
    let snapshot_pos = after
        .iter()
        .position(|m| m.get("type").and_then(Value::as_str) == Some("state_snapshot"))
        .unwrap();
    let pong_pos = after
        .iter()
        .position(|m| m.get("type").and_then(Value::as_str) == Some("pong"))
        .unwrap();
    assert!(snapshot_pos < pong_pos, "snapshot must precede post-reconnect replies");

    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn shutdown_is_deadline_bounded_with_live_children() {
    let plane = FakeControlPlane::spawn(TOKEN).await.unwrap();
    let staging = tempfile::tempdir().unwrap();
    // An agent that ignores EOF and lingers; SIGKILL escalation applies.
    let agent = write_script(staging.path(), "fake-agent", "sleep 300");
    let mut daemon = spawn_daemon(
        &plane.url,
        TOKEN,
        &[("CHIEF_CLAUDE_BINARY", agent.to_str().unwrap())],
    )
    .unwrap();
    daemon.seed_prd("web", "checkout", &[("US-001", false)]);
    plane.wait_for("state_snapshot", DEADLINE).await;

    plane.send_command(json!({
        "type": "new_prd", "id": "req-1",
        "project": "web", "session_id": "sess-1", "message": "draft"
    }));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let start = std::time::Instant::now();
    let code = daemon.terminate_within(Duration::from_secs(12)).unwrap();
    assert_eq!(code, 0);
    assert!(start.elapsed() < Duration::from_secs(12));
}
