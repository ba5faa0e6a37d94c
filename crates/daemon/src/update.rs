// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Release-feed checking for `trigger_update`. A newer release is installed
//! over the current executable and the daemon exits to be restarted by its
//! supervisor; an up-to-date daemon replies `update_available` with the
//! current/latest pair.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

/// One entry from the release feed.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub version: String,
    pub url: String,
}

/// Release-channel boundary, object-safe so tests can stub it.
pub trait Updater: Send + Sync {
    fn check(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Release>> + Send + '_>>;
    fn install<'a>(
        &'a self,
        release: &'a Release,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// `true` when `latest` is a strictly newer `x.y.z` than `current`.
/// Unparseable versions never trigger an install.
pub fn is_newer(current: &str, latest: &str) -> bool {
    match (parse_version(current), parse_version(latest)) {
        (Some(current), Some(latest)) => latest > current,
        _ => false,
    }
}

fn parse_version(v: &str) -> Option<(u64, u64, u64)> {
    let mut parts = v.trim().trim_start_matches('v').splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

/// Production updater backed by an HTTP JSON feed.
pub struct FeedUpdater {
    client: reqwest::Client,
    feed_url: String,
}

impl FeedUpdater {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), feed_url: feed_url.into() }
    }
}

impl Updater for FeedUpdater {
    fn check(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Release>> + Send + '_>> {
        Box::pin(async move {
            let resp = self.client.get(&self.feed_url).send().await?;
            if !resp.status().is_success() {
                anyhow::bail!("release feed returned {}", resp.status());
            }
            let release: Release = resp.json().await?;
            Ok(release)
        })
    }

    /// Download the release binary and swap it over the running executable
    /// (write sibling tmp + rename, same-filesystem atomic).
    fn install<'a>(
        &'a self,
        release: &'a Release,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let exe = std::env::current_exe()?;
            let resp = self.client.get(&release.url).send().await?;
            if !resp.status().is_success() {
                anyhow::bail!("release download returned {}", resp.status());
            }
            let bytes = resp.bytes().await?;

            let tmp = exe.with_extension("update");
            std::fs::write(&tmp, &bytes)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))?;
            }
            std::fs::rename(&tmp, &exe)?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "update_tests.rs"]
mod tests;
