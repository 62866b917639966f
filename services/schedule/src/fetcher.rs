//! Blocking HTTP download of the pointer snapshot

use anyhow::{bail, Context, Result};
use pointer_config::SnapshotFetcher;
use std::time::Duration;
use tracing::debug;

/// Default request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpSnapshotFetcher {
    client: reqwest::blocking::Client,
}

impl HttpSnapshotFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lineup/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl SnapshotFetcher for HttpSnapshotFetcher {
    fn fetch_snapshot(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            bail!("HTTP {} from {}", response.status(), url);
        }

        let body = response
            .bytes()
            .with_context(|| format!("Failed to read response from {}", url))?;
        debug!(url, bytes = body.len(), "Downloaded pointer snapshot");
        Ok(body.to_vec())
    }
}
