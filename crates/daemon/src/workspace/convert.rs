// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PRD markdown → JSON synchronization.
//!
//! The conversion body is pluggable; the daemon only owns the sweep that
//! decides which PRDs are stale. The built-in converter understands the
//! checklist layout `chief` PRDs use (`- [x] US-001: Title`).

use std::path::Path;

use tracing::{debug, warn};

use super::prd::{self, PrdState, UserStory};

/// Converts one `prd.md` into its `prd.json`.
pub trait PrdConverter: Send + Sync {
    fn convert(&self, md: &Path, json: &Path) -> anyhow::Result<()>;
}

/// Convert every PRD of a project whose markdown is newer than its JSON
/// (or whose JSON is missing). Returns how many were converted.
pub fn sync_project(converter: &dyn PrdConverter, project_path: &Path) -> usize {
    let root = prd::prds_root(project_path);
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut converted = 0;
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let md = dir.join("prd.md");
        let json = dir.join("prd.json");
        if !md.exists() || up_to_date(&md, &json) {
            continue;
        }
        match converter.convert(&md, &json) {
            Ok(()) => converted += 1,
            Err(e) => warn!(err = %e, prd = %dir.display(), "prd conversion failed"),
        }
    }
    if converted > 0 {
        debug!(converted, project = %project_path.display(), "prd sync");
    }
    converted
}

/// JSON exists and is at least as new as the markdown.
fn up_to_date(md: &Path, json: &Path) -> bool {
    let md_time = std::fs::metadata(md).and_then(|m| m.modified()).ok();
    let json_time = std::fs::metadata(json).and_then(|m| m.modified()).ok();
    match (md_time, json_time) {
        (Some(md_time), Some(json_time)) => json_time >= md_time,
        _ => false,
    }
}

/// Built-in converter for checklist-style PRDs.
///
/// Story lines look like `- [x] US-001: Persist the cart` with `[x]`
/// meaning the story passes. The first `#` heading becomes the PRD name.
pub struct ChecklistConverter;

impl PrdConverter for ChecklistConverter {
    fn convert(&self, md: &Path, json: &Path) -> anyhow::Result<()> {
        let markdown = std::fs::read_to_string(md)?;
        let previous = prd::load(json).unwrap_or_default();

        let mut name = previous.name.clone();
        let mut stories = Vec::new();
        for line in markdown.lines() {
            let trimmed = line.trim();
            if name.is_none() {
                if let Some(heading) = trimmed.strip_prefix("# ") {
                    name = Some(heading.trim().to_owned());
                }
            }
            if let Some(story) = parse_story_line(trimmed) {
                stories.push(story);
            }
        }

        let state = PrdState { project: previous.project, name, user_stories: stories };
        prd::save(json, &state)
    }
}

fn parse_story_line(line: &str) -> Option<UserStory> {
    let (passes, rest) = if let Some(rest) = line.strip_prefix("- [x] ") {
        (true, rest)
    } else if let Some(rest) = line.strip_prefix("- [ ] ") {
        (false, rest)
    } else {
        return None;
    };

    let (id, title) = match rest.split_once(':') {
        Some((id, title)) => (id.trim(), title.trim()),
        None => (rest.trim(), ""),
    };
    if id.is_empty() {
        return None;
    }
    Some(UserStory {
        id: id.to_owned(),
        title: title.to_owned(),
        passes,
        in_progress: None,
    })
}

#[cfg(test)]
#[path = "convert_tests.rs"]
mod tests;
