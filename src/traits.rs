use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::harvest::retry::IsRetryable;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },
    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl FetchError {
    pub fn url(&self) -> Option<&str> {
        match self {
            FetchError::Transport { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Decode { url, .. } => Some(url),
            FetchError::Client(_) => None,
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport { .. } | FetchError::Status { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to parse document from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid link '{href}' in {url}: {message}")]
    InvalidLink {
        url: String,
        href: String,
        message: String,
    },
}

impl ParseError {
    pub fn json(url: &str, source: serde_json::Error) -> Self {
        ParseError::Json {
            url: url.to_string(),
            source,
        }
    }
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetches the JSON document at `url`.
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;

    /// Posts `body` to `url` and returns the JSON response (STAC API search).
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, FetchError>;
}
