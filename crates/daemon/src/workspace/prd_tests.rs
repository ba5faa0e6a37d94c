// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{load, mark_in_progress, prd_json_path, save, PrdState, UserStory};

fn story(id: &str, passes: bool) -> UserStory {
    UserStory { id: id.to_owned(), title: format!("story {id}"), passes, in_progress: None }
}

fn write_prd(dir: &std::path::Path, stories: Vec<UserStory>) -> std::path::PathBuf {
    let path = prd_json_path(dir, "checkout");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let state =
        PrdState { project: "web".to_owned(), name: Some("Checkout".to_owned()), user_stories: stories };
    save(&path, &state).unwrap();
    path
}

#[test]
fn parses_camel_case_disk_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = prd_json_path(dir.path(), "checkout");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{"project":"web","userStories":[{"id":"US-001","title":"t","passes":true,"inProgress":true}]}"#,
    )
    .unwrap();

    let state = load(&path).unwrap();
    assert_eq!(state.user_stories.len(), 1);
    assert!(state.user_stories[0].passes);
    assert_eq!(state.user_stories[0].in_progress, Some(true));
}

#[test]
fn counts_and_status() {
    let state = PrdState {
        project: "web".to_owned(),
        name: None,
        user_stories: vec![story("US-001", true), story("US-002", false), story("US-003", true)],
    };
    assert_eq!(state.counts(), (2, 3));
    assert_eq!(state.status(), "2/3");
}

#[test]
fn mark_in_progress_sets_exactly_one_story() {
    let dir = tempfile::tempdir().unwrap();
    let mut stories = vec![story("US-001", true), story("US-002", false), story("US-003", false)];
    stories[2].in_progress = Some(true);
    let path = write_prd(dir.path(), stories);

    mark_in_progress(&path, "US-002").unwrap();

    let state = load(&path).unwrap();
    let flagged: Vec<&str> = state
        .user_stories
        .iter()
        .filter(|s| s.in_progress == Some(true))
        .map(|s| s.id.as_str())
        .collect();
    assert_eq!(flagged, vec!["US-002"]);
}

#[test]
fn mark_in_progress_skips_passing_stories() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_prd(dir.path(), vec![story("US-001", true), story("US-002", false)]);

    mark_in_progress(&path, "US-001").unwrap();

    let state = load(&path).unwrap();
    assert!(state.user_stories.iter().all(|s| s.in_progress.is_none()));
}

#[test]
fn mark_in_progress_with_empty_story_clears_all_flags() {
    let dir = tempfile::tempdir().unwrap();
    let mut stories = vec![story("US-001", false)];
    stories[0].in_progress = Some(true);
    let path = write_prd(dir.path(), stories);

    mark_in_progress(&path, "").unwrap();

    let state = load(&path).unwrap();
    assert!(state.user_stories.iter().all(|s| s.in_progress.is_none()));
}
