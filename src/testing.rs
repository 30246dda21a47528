//! In-memory [`DocumentSource`] used by unit tests.

use crate::traits::{DocumentSource, FetchError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MemorySource {
    documents: Mutex<HashMap<String, Value>>,
    search_responses: Mutex<HashMap<String, Value>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, u32>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn insert(&self, url: &str, document: Value) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), document);
    }

    pub(crate) fn insert_search(&self, url: &str, response: Value) {
        self.search_responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// The next `times` fetches of `url` fail with a transport error.
    pub(crate) fn fail_transiently(&self, url: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
    }

    pub(crate) fn calls(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, url: &str, table: &Mutex<HashMap<String, Value>>) -> Result<Value, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Transport {
                        url: url.to_string(),
                        message: "connection reset".to_string(),
                    });
                }
            }
        }

        table
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        self.respond(url, &self.documents).await
    }

    async fn post_json(&self, url: &str, _body: &Value) -> Result<Value, FetchError> {
        self.respond(url, &self.search_responses).await
    }
}
