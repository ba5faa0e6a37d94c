// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound HTTP side of the uplink: daemon registration and batched
//! message delivery.

use anyhow::Context;

use super::{ConnectError, MessageClass};

pub struct HttpClient {
    client: reqwest::Client,
    base: String,
    daemon_id: String,
}

impl HttpClient {
    pub fn new(base: impl Into<String>, daemon_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_owned(),
            daemon_id: daemon_id.into(),
        }
    }

    /// `POST /api/v1/daemons/register` — announce this daemon and validate
    /// credentials. 401/403 means the token is invalid or revoked.
    pub async fn register(
        &self,
        token: &str,
        workspace: &str,
        version: &str,
    ) -> Result<(), ConnectError> {
        let url = format!("{}/api/v1/daemons/register", self.base);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "daemon_id": self.daemon_id,
                "workspace": workspace,
                "version": version,
            }))
            .send()
            .await
            .map_err(|e| ConnectError::Transport(anyhow::Error::new(e).context("register")))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectError::AuthFailed(body));
        }
        if !status.is_success() {
            return Err(ConnectError::Transport(anyhow::anyhow!(
                "register failed with status {status}"
            )));
        }
        Ok(())
    }

    /// `POST /api/v1/daemons/{id}/messages` — deliver one flushed batch as a
    /// JSON array. Payloads are already-serialized objects, so the body is
    /// assembled without re-parsing them.
    pub async fn post_batch(
        &self,
        token: &str,
        batch: &[(MessageClass, Vec<u8>)],
    ) -> anyhow::Result<()> {
        let mut body = Vec::with_capacity(batch.iter().map(|(_, p)| p.len() + 1).sum::<usize>() + 2);
        body.push(b'[');
        for (i, (_, payload)) in batch.iter().enumerate() {
            if i > 0 {
                body.push(b',');
            }
            body.extend_from_slice(payload);
        }
        body.push(b']');

        let url = format!("{}/api/v1/daemons/{}/messages", self.base, self.daemon_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .context("post batch")?;

        if !resp.status().is_success() {
            anyhow::bail!("batch delivery failed with status {}", resp.status());
        }
        Ok(())
    }

    /// WebSocket URL for the command subscription.
    pub fn commands_ws_url(&self, token: &str) -> String {
        let ws_base = self.base.replace("http://", "ws://").replace("https://", "wss://");
        format!("{ws_base}/api/v1/daemons/{}/commands?token={token}", self.daemon_id)
    }
}
