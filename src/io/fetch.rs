use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Default timeout for a single remote image fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches image bytes by URL.
///
/// A non-success status or a transport error fails only the call that
/// produced it; callers decide whether that is fatal.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes, IoError>;
}

/// HTTP(S) implementation of [`ImageFetcher`] backed by `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, IoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IoError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Bytes, IoError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                IoError::Timeout {
                    url: url.to_string(),
                }
            } else {
                IoError::Connection(format!("{}: {}", url, e))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(IoError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", url, e)))
    }
}
