use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::dto::FeedResponse;
use crate::util::validate_feed_url;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Header carrying the API key, when one is configured
const API_KEY_HEADER: &str = "X-Api-Key";

/// Errors that can occur while fetching a category page.
///
/// Network failures and malformed payloads. The synchronizer absorbs every
/// one of these; none reaches the coordinator as a hard failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body was not a feed payload
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Base URL or category could not form a request URL
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
}

/// Request policy for the feed endpoint.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Per-attempt timeout, covering headers and body
    pub timeout: Duration,
    /// Retries after the first attempt for 429, 5xx and truncated bodies
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub retry_backoff: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// HTTP client for `GET {base}/feed?category=<c>`.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    options: FetchOptions,
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("options", &self.options)
            .finish()
    }
}

impl FeedClient {
    /// Build a client for the endpoint rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] if `base_url` is not an http(s) URL,
    /// [`FetchError::Network`] if the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        options: FetchOptions,
    ) -> Result<Self, FetchError> {
        let base_url =
            validate_feed_url(base_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("newscache/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            options,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full request URL for `category`.
    pub fn endpoint(&self, category: &str) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join("feed")
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("category", category);
        Ok(url)
    }

    /// Fetch and decode one category page.
    ///
    /// 429, 5xx and truncated bodies are retried with exponential backoff
    /// (`retry_backoff`, doubling) up to `max_retries` times. Other 4xx
    /// statuses fail at once.
    pub async fn fetch_category(&self, category: &str) -> Result<FeedResponse, FetchError> {
        let url = self.endpoint(category)?;
        let max_retries = self.options.max_retries;
        let mut retry_count = 0;

        let bytes = loop {
            let mut request = self.http.get(url.clone());
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key.expose_secret());
            }

            let response = tokio::time::timeout(self.options.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= max_retries {
                    return Err(FetchError::RateLimited(max_retries));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    category = %category,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    category = %category,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let body = tokio::time::timeout(
                self.options.timeout,
                read_limited_bytes(response, MAX_FEED_SIZE),
            )
            .await
            .map_err(|_| FetchError::Timeout)?;

            match body {
                Ok(bytes) => break bytes,
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        category = %category,
                        expected,
                        received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.options
            .retry_backoff
            .saturating_mul(2u32.saturating_pow(retry_count))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
