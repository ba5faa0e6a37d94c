// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-story append logs under `<prd_dir>/logs/`. One run = one log
//! generation: opening a logger erases whatever the previous run left.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use tracing::debug;

pub struct StoryLogger {
    logs_dir: PathBuf,
    files: Mutex<HashMap<String, File>>,
}

impl StoryLogger {
    /// Derive `<prd_dir>/logs/` from the PRD's JSON path, wipe it, and
    /// recreate it empty.
    pub fn open(prd_json_path: &Path) -> anyhow::Result<Self> {
        let prd_dir = prd_json_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("prd path has no parent: {}", prd_json_path.display()))?;
        let logs_dir = prd_dir.join("logs");
        if logs_dir.exists() {
            std::fs::remove_dir_all(&logs_dir)
                .with_context(|| format!("clearing {}", logs_dir.display()))?;
        }
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("creating {}", logs_dir.display()))?;
        Ok(Self { logs_dir, files: Mutex::new(HashMap::new()) })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Append one line to the story's log. No-op when `story_id` is empty
    /// (events can arrive before the first `story_started`).
    pub fn write(&self, story_id: &str, line: &str) {
        if story_id.is_empty() {
            return;
        }
        let mut files = self.files.lock();
        let file = match files.entry(story_id.to_owned()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let path = self.logs_dir.join(format!("{story_id}.log"));
                match OpenOptions::new().create(true).append(true).open(&path) {
                    Ok(file) => e.insert(file),
                    Err(err) => {
                        debug!(err = %err, story_id, "story log open failed");
                        return;
                    }
                }
            }
        };
        if let Err(err) = writeln!(file, "{line}") {
            debug!(err = %err, story_id, "story log write failed");
        }
    }

    /// Flush and drop every handle.
    pub fn close(&self) {
        let mut files = self.files.lock();
        for (_, mut file) in files.drain() {
            let _ = file.flush();
        }
    }
}

impl Drop for StoryLogger {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "story_log_tests.rs"]
mod tests;
