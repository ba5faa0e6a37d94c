// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk PRD state: `<project>/.chief/prds/<id>/prd.json` access and the
//! story-progress bookkeeping shared by the scanner and the run manager.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Structured PRD state as stored in `prd.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrdState {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "userStories", default)]
    pub user_stories: Vec<UserStory>,
}

/// One user story; the atomic unit of work a run advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStory {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub passes: bool,
    #[serde(rename = "inProgress", default, skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<bool>,
}

impl PrdState {
    /// `(passed, total)` story counts.
    pub fn counts(&self) -> (usize, usize) {
        let passed = self.user_stories.iter().filter(|s| s.passes).count();
        (passed, self.user_stories.len())
    }

    /// Completion status in the `passed/total` wire form.
    pub fn status(&self) -> String {
        let (passed, total) = self.counts();
        format!("{passed}/{total}")
    }
}

/// `<project>/.chief/prds`
pub fn prds_root(project_path: &Path) -> PathBuf {
    project_path.join(".chief").join("prds")
}

/// `<project>/.chief/prds/<id>/prd.json`
pub fn prd_json_path(project_path: &Path, prd_id: &str) -> PathBuf {
    prds_root(project_path).join(prd_id).join("prd.json")
}

/// `<project>/.chief/prds/<id>/prd.md`
pub fn prd_md_path(project_path: &Path, prd_id: &str) -> PathBuf {
    prds_root(project_path).join(prd_id).join("prd.md")
}

pub fn load(path: &Path) -> anyhow::Result<PrdState> {
    let contents = std::fs::read_to_string(path)?;
    let state: PrdState = serde_json::from_str(&contents)?;
    Ok(state)
}

/// Write `prd.json` atomically (tmp + rename) so a mid-write crash never
/// leaves a half-serialized state for the scanner to trip over.
pub fn save(path: &Path, state: &PrdState) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Mark `story_id` as the story to resume from: `inProgress: true` on it,
/// cleared everywhere else. Stories that already pass are left untouched
/// and nothing is marked.
///
/// At most one story per PRD carries `inProgress=true` on disk.
pub fn mark_in_progress(path: &Path, story_id: &str) -> anyhow::Result<()> {
    let mut state = load(path)?;

    let passes = state
        .user_stories
        .iter()
        .find(|s| s.id == story_id)
        .map(|s| s.passes)
        .unwrap_or(false);

    for story in &mut state.user_stories {
        story.in_progress = None;
    }
    if !passes && !story_id.is_empty() {
        if let Some(story) = state.user_stories.iter_mut().find(|s| s.id == story_id) {
            story.in_progress = Some(true);
        }
    }

    save(path, &state)
}

#[cfg(test)]
#[path = "prd_tests.rs"]
mod tests;
