// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Story-commit resolution: diffs are looked up by searching the project's
//! git log for the newest commit whose message mentions the story id
//! (commits follow the `feat: US-001 - …` convention).

use std::path::Path;
use std::process::Stdio;

use crate::protocol::FileDiff;

async fn git(project_path: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(project_path)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Newest commit hash whose message contains `story_id`, if any.
///
/// Repositories with several matching commits resolve to the most recent
/// one; earlier changes for the same story are not aggregated.
pub async fn resolve_story_commit(
    project_path: &Path,
    story_id: &str,
) -> anyhow::Result<Option<String>> {
    if story_id.is_empty() {
        return Ok(None);
    }
    let out = git(
        project_path,
        &["log", "--fixed-strings", &format!("--grep={story_id}"), "-n1", "--format=%H"],
    )
    .await?;
    let hash = out.trim();
    if hash.is_empty() {
        Ok(None)
    } else {
        Ok(Some(hash.to_owned()))
    }
}

/// Unified diff and touched files for a story's commit.
pub async fn story_diff(
    project_path: &Path,
    story_id: &str,
) -> anyhow::Result<Option<(Vec<String>, String)>> {
    let Some(hash) = resolve_story_commit(project_path, story_id).await? else {
        return Ok(None);
    };

    let names = git(project_path, &["show", "--name-only", "--format=", &hash]).await?;
    let files: Vec<String> = names.lines().filter(|l| !l.is_empty()).map(str::to_owned).collect();
    let diff_text = git(project_path, &["show", &hash]).await?;
    Ok(Some((files, diff_text)))
}

/// Per-file stats and patches for a story's commit.
pub async fn story_file_diffs(
    project_path: &Path,
    story_id: &str,
) -> anyhow::Result<Option<Vec<FileDiff>>> {
    let Some(hash) = resolve_story_commit(project_path, story_id).await? else {
        return Ok(None);
    };

    // --numstat: "<additions>\t<deletions>\t<filename>" per file.
    let numstat = git(project_path, &["show", "--numstat", "--format=", &hash]).await?;
    let patch = git(project_path, &["show", "--format=", &hash]).await?;
    let patches = split_patches(&patch);

    let mut files = Vec::new();
    for line in numstat.lines().filter(|l| !l.is_empty()) {
        let mut parts = line.splitn(3, '\t');
        let additions = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let deletions = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let Some(filename) = parts.next() else { continue };
        files.push(FileDiff {
            filename: filename.to_owned(),
            additions,
            deletions,
            patch: patches
                .iter()
                .find(|(name, _)| name == filename)
                .map(|(_, p)| p.clone())
                .unwrap_or_default(),
        });
    }
    Ok(Some(files))
}

/// Split a `git show` patch into per-file chunks keyed by the b-side path.
fn split_patches(patch: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let name = rest
                .split_whitespace()
                .last()
                .and_then(|b| b.strip_prefix("b/"))
                .unwrap_or_default()
                .to_owned();
            out.push((name, String::new()));
        }
        if let Some((_, chunk)) = out.last_mut() {
            chunk.push_str(line);
            chunk.push('\n');
        }
    }
    out
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;
