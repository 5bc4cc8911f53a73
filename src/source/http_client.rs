use crate::config::SourceConfig;
use crate::error::SourceError;
use anyhow::{Context, Result};
use rand::Rng;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Thin reqwest wrapper: one attempt per call, with a polite delay first.
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
}

impl HttpClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Yahoo hands out a consent cookie on first contact
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
        })
    }

    /// GET a URL and decode the JSON body.
    ///
    /// The body of a 404 is still decoded when possible, since chart
    /// endpoints describe unknown symbols there.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(SourceError::RateLimited);
        }
        if !status.is_success() && status.as_u16() != 404 {
            return Err(SourceError::Http { status: status.as_u16() });
        }

        let body = resp
            .json::<T>()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()));

        match body {
            Err(_) if status.as_u16() == 404 => Err(SourceError::Http { status: 404 }),
            other => other,
        }
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        let total = self.request_delay_ms + jitter;
        if total > 0 {
            sleep(Duration::from_millis(total)).await;
        }
    }
}
