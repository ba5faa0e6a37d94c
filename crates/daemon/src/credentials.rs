// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential file access and refresh-token exchange.
//!
//! The login subsystem owns credential creation; the daemon only reads the
//! file, exchanges the refresh token when the control plane rejects the
//! access token, and rewrites the file atomically on success.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stored OAuth tokens for the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as epoch seconds.
    #[serde(default)]
    pub expires_at: u64,
}

/// Load credentials from a JSON file.
pub fn load(path: &Path) -> anyhow::Result<Credentials> {
    let contents = std::fs::read_to_string(path)?;
    let creds: Credentials = serde_json::from_str(&contents)?;
    Ok(creds)
}

/// Save credentials atomically (write tmp + rename).
pub fn save(path: &Path, creds: &Credentials) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(creds)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

/// Perform a single refresh-token exchange against the control plane.
async fn do_refresh(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
) -> anyhow::Result<TokenResponse> {
    let resp = client
        .post(token_url)
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("refresh failed ({status}): {text}");
    }

    let token: TokenResponse = resp.json().await?;
    Ok(token)
}

/// Refresh-token exchange with exponential backoff retries.
///
/// On success the credentials file is rewritten and the fresh access token
/// returned; this is the daemon's `on_auth_failure` hook body.
pub struct TokenRefresher {
    client: reqwest::Client,
    token_url: String,
    credentials_path: PathBuf,
}

impl TokenRefresher {
    pub fn new(server_url: &str, credentials_path: PathBuf) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: format!("{}/api/v1/auth/token", server_url.trim_end_matches('/')),
            credentials_path,
        }
    }

    pub async fn refresh(&self) -> anyhow::Result<String> {
        let creds = load(&self.credentials_path)?;

        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(30);
        let max_retries = 3;

        for attempt in 0..=max_retries {
            match do_refresh(&self.client, &self.token_url, &creds.refresh_token).await {
                Ok(token) => {
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();
                    let updated = Credentials {
                        access_token: token.access_token.clone(),
                        refresh_token: token
                            .refresh_token
                            .unwrap_or_else(|| creds.refresh_token.clone()),
                        expires_at: now + token.expires_in,
                    };
                    save(&self.credentials_path, &updated)?;
                    return Ok(token.access_token);
                }
                Err(e) => {
                    if attempt == max_retries {
                        return Err(e);
                    }
                    debug!(attempt, err = %e, "refresh attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }

        anyhow::bail!("refresh exhausted all retries")
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
