use crate::feed::parser::parse_feed;
use crate::feed::{FeedError, FeedSource, ParsedFeed};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 2;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Failures retrieving a feed body over HTTP.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS, connection, TLS and similar transport failures
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Server kept answering 429 after every retry
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// [`FeedSource`] backed by `reqwest` and `feed-rs`.
///
/// `timeout` bounds the whole fetch, retries and backoff included, so one
/// slow feed cannot hold a run for longer than that. 429, 5xx and truncated
/// bodies are retried with exponential backoff (1s, 2s); other 4xx fail
/// immediately.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    timeout: Duration,
    backoff_base: Duration,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Builds a client carrying `user_agent`; feeds behind some CDNs refuse
    /// requests without one.
    pub fn with_user_agent(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self::new(client, timeout))
    }

    #[cfg(test)]
    fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.pow(attempt)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tokio::time::timeout(self.timeout, self.fetch_with_retries(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;

        loop {
            let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout(self.timeout))??;
            let status = response.status();

            let retryable = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }
                true
            } else if status.is_server_error() {
                if attempt >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                true
            } else if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            } else {
                false
            };

            if !retryable {
                let read = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_FEED_SIZE))
                    .await
                    .map_err(|_| FetchError::Timeout(self.timeout))?;
                match read {
                    Ok(bytes) => return Ok(bytes),
                    Err(FetchError::IncompleteResponse { .. }) if attempt < MAX_RETRIES => {}
                    Err(e) => return Err(e),
                }
            }

            let delay = self.backoff(attempt);
            tracing::warn!(
                feed = %url,
                status = %status,
                retry = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Feed fetch failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FeedError> {
        let bytes = self.fetch_bytes(url).await?;
        let feed = parse_feed(&bytes)?;
        tracing::debug!(feed = %url, entries = feed.entries.len(), bytes = bytes.len(), "Fetched feed");
        Ok(feed)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
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
