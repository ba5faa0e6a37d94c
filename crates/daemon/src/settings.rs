// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-project settings: `.chief/config.json` read and deep-merge update.

use std::path::{Path, PathBuf};

use serde_json::Value;

pub fn settings_path(project_path: &Path) -> PathBuf {
    project_path.join(".chief").join("config.json")
}

/// Read a project's settings; a missing file is an empty object.
pub fn get_settings(project_path: &Path) -> anyhow::Result<Value> {
    let path = settings_path(project_path);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Default::default())),
        Err(e) => Err(e.into()),
    }
}

/// Deep-merge `patch` into the stored settings and write the result back
/// atomically. Returns the merged document. A `null` patch (field omitted
/// on the wire) leaves the stored settings untouched.
pub fn update_settings(project_path: &Path, patch: &Value) -> anyhow::Result<Value> {
    let mut merged = get_settings(project_path)?;
    if !patch.is_null() {
        deep_merge(&mut merged, patch);
    }

    let path = settings_path(project_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&merged)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(merged)
}

/// Objects merge recursively; everything else (including `null`) replaces.
fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
