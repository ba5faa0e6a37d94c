// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Headless workspace daemon for the chief control plane.
#[derive(Debug, Clone, Parser)]
#[command(name = "chiefd", version, about)]
pub struct Config {
    /// Workspace root containing project directories.
    #[arg(long, env = "CHIEF_WORKSPACE")]
    pub workspace: PathBuf,

    /// Control plane base URL.
    #[arg(long, env = "CHIEF_SERVER_URL", default_value = "https://api.chief.build")]
    pub server_url: String,

    /// Override path to the coding agent CLI.
    #[arg(long, env = "CHIEF_CLAUDE_BINARY")]
    pub claude_binary: Option<String>,

    /// Path to the OAuth credentials file written by `chief login`.
    #[arg(long, env = "CHIEF_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Path to the Ralph-loop engine executable.
    #[arg(long, env = "CHIEF_ENGINE_BINARY", default_value = "chief-engine")]
    pub engine_binary: String,

    /// Workspace scan interval in seconds.
    #[arg(long, env = "CHIEF_SCAN_INTERVAL", default_value = "5")]
    pub scan_interval: u64,

    /// PRD session inactivity timeout in seconds.
    #[arg(long, env = "CHIEF_SESSION_TIMEOUT", default_value = "1800")]
    pub session_timeout: u64,

    /// How often the inactivity checker wakes, in seconds.
    #[arg(long, env = "CHIEF_SESSION_CHECK_INTERVAL", default_value = "30")]
    pub session_check_interval: u64,

    /// Inactivity warning thresholds in minutes, comma separated. Empty
    /// disables warnings.
    #[arg(long, env = "CHIEF_SESSION_WARNINGS", default_value = "20,25,29")]
    pub session_warnings: String,

    /// Release feed URL consulted by trigger_update.
    #[arg(long, env = "CHIEF_RELEASE_FEED", default_value = "https://releases.chief.build/stable.json")]
    pub release_feed: String,

    /// Log format (json or text).
    #[arg(long, env = "CHIEF_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CHIEF_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.workspace.is_dir() {
            anyhow::bail!("workspace is not a directory: {}", self.workspace.display());
        }
        if self.server_url.is_empty() {
            anyhow::bail!("--server-url must not be empty");
        }
        if self.session_timeout == 0 {
            anyhow::bail!("--session-timeout must be positive");
        }
        for minutes in self.warning_minutes()? {
            if minutes * 60 >= self.session_timeout {
                anyhow::bail!(
                    "warning threshold {minutes}m is not below the session timeout"
                );
            }
        }
        Ok(())
    }

    /// Path to the agent CLI, honoring `CHIEF_CLAUDE_BINARY`.
    pub fn agent_binary(&self) -> String {
        self.claude_binary.clone().unwrap_or_else(|| "claude".to_owned())
    }

    /// Credentials file location, defaulting under the user config dir.
    pub fn credentials_path(&self) -> PathBuf {
        match self.credentials {
            Some(ref p) => p.clone(),
            None => {
                let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
                home.join(".config").join("chief").join("credentials.json")
            }
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    pub fn session_check_interval(&self) -> Duration {
        Duration::from_secs(self.session_check_interval)
    }

    fn warning_minutes(&self) -> anyhow::Result<Vec<u64>> {
        self.session_warnings
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("bad warning threshold: {s:?}"))
            })
            .collect()
    }

    /// Warning thresholds as durations, ascending. Unparseable entries
    /// were already rejected by `validate`.
    pub fn warning_thresholds(&self) -> Vec<Duration> {
        let mut mins = self.warning_minutes().unwrap_or_default();
        mins.sort_unstable();
        mins.into_iter().map(|m| Duration::from_secs(m * 60)).collect()
    }
}

/// A config with test-friendly defaults rooted at `workspace`.
pub fn test_config(workspace: PathBuf) -> Config {
    Config {
        workspace,
        server_url: "http://127.0.0.1:0".to_owned(),
        claude_binary: None,
        credentials: None,
        engine_binary: "chief-engine".to_owned(),
        scan_interval: 5,
        session_timeout: 1800,
        session_check_interval: 30,
        session_warnings: "20,25,29".to_owned(),
        release_feed: "http://127.0.0.1:0/stable.json".to_owned(),
        log_format: "text".to_owned(),
        log_level: "info".to_owned(),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
