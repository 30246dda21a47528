//! HTTP document source backed by `reqwest`.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::traits::{DocumentSource, FetchError};

/// Per-request timeout used by [`HttpSource::new`].
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Fetches catalog documents over HTTP(S).
///
/// The underlying client pools connections, so one `HttpSource` should be
/// shared (behind an `Arc`) by every fetch task of a run.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Client(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn read_json(url: &str, request: reqwest::RequestBuilder) -> Result<Value, FetchError> {
        let response = request.send().await.map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| transport_error(url, e))?;
        debug!(url, bytes = body.len(), "Fetched document");

        serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    let message = if e.is_timeout() {
        format!("timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    };
    FetchError::Transport {
        url: url.to_string(),
        message,
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        Self::read_json(url, self.client.get(url)).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, FetchError> {
        Self::read_json(url, self.client.post(url).json(body)).await
    }
}
