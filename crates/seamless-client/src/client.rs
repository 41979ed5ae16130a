//! Chunk server HTTP client.

use std::time::Duration;

use bytes::Bytes;
use seamless_core::{ClientConfig, Error, HttpError, Result, StreamDetails};
use tracing::{debug, warn};
use url::Url;

/// Base delay for exponential backoff (milliseconds).
const BASE_RETRY_DELAY_MS: u64 = 500;

/// Client for the server publishing stream catalogs and chunk payloads.
#[derive(Clone)]
pub struct ChunkClient {
    http: reqwest::Client,
    base: Url,
    details_path: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl ChunkClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut base = config.base_url()?;
        // Relative locations resolve inside the server root, not beside it
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base,
            details_path: config.details_path.clone(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        })
    }

    /// Override the base backoff delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve a chunk location against the server root.
    pub fn resolve(&self, location: &str) -> Result<Url> {
        self.base
            .join(location)
            .map_err(|e| Error::Http(HttpError::InvalidUrl(format!("{location}: {e}"))))
    }

    /// Fetch the catalogs of every published stream.
    pub async fn fetch_details(&self) -> Result<StreamDetails> {
        let url = self.resolve(&self.details_path)?;
        let body = self.get(&url).await?;
        let details: StreamDetails = serde_json::from_slice(&body)?;
        debug!("Fetched details for {} streams", details.details.len());
        Ok(details)
    }

    /// Fetch one chunk payload.
    pub async fn fetch_chunk(&self, location: &str) -> Result<Bytes> {
        let url = self.resolve(location)?;
        self.get(&url).await
    }

    /// Delay before retry `attempt` (1-based).
    fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    async fn get(&self, url: &Url) -> Result<Bytes> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay(attempt);
                tokio::time::sleep(delay).await;
                debug!("Retry attempt {attempt} for {url} after {delay:?}");
            }

            match self.do_request(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!("Request to {url} failed (attempt {attempt}): {e}");

                    if !e.is_retryable() {
                        return Err(e);
                    }

                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Network("Request failed".to_string())))
    }

    async fn do_request(&self, url: &Url) -> Result<Bytes> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Http(HttpError::StatusError {
                status: status.as_u16(),
                message,
            }));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {e}")))
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Http(HttpError::Timeout)
    } else if e.is_connect() {
        Error::Http(HttpError::ConnectionFailed(e.to_string()))
    } else {
        Error::Network(e.to_string())
    }
}
