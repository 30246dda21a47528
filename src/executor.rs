use crate::harvest::retry::{fetch_with_retry, RetryPolicy};
use crate::traits::{DocumentSource, FetchError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, instrument};

/// Outcome of one document fetch, tagged with its submission index.
#[derive(Debug)]
pub struct FetchOutcome {
    pub index: usize,
    pub url: String,
    pub result: Result<Value, FetchError>,
}

/// Bounded worker pool for document fetches.
///
/// Every fetch holds a semaphore permit while it runs, so at most
/// `concurrency_limit` requests are in flight regardless of batch size.
#[derive(Clone)]
pub struct FetchExecutor {
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl FetchExecutor {
    pub fn new(concurrency_limit: usize, retry: RetryPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Spawns one retrying fetch per URL. Results come back through the
    /// returned [`FetchBatch`] in completion order.
    #[instrument(skip(self, source, urls), fields(count = urls.len()))]
    pub fn spawn_all<S>(&self, source: Arc<S>, urls: Vec<String>) -> FetchBatch
    where
        S: DocumentSource + 'static,
    {
        let total = urls.len();
        let mut tasks = JoinSet::new();

        for (index, url) in urls.into_iter().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            let source = Arc::clone(&source);
            let retry = self.retry;

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let (source, url) = (&source, &url);
                        fetch_with_retry(&retry, move || source.get_json(url)).await
                    }
                    Err(e) => Err(FetchError::Transport {
                        url: url.clone(),
                        message: format!("Semaphore error: {}", e),
                    }),
                };
                FetchOutcome { index, url, result }
            });
        }

        debug!(total, "Fetch batch scheduled");
        FetchBatch { tasks, total }
    }
}

/// In-flight fetches of one batch. Dropping the batch aborts whatever is
/// still running.
pub struct FetchBatch {
    tasks: JoinSet<FetchOutcome>,
    total: usize,
}

impl FetchBatch {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next finished fetch, or `None` once the batch is drained.
    pub async fn next(&mut self) -> Option<Result<FetchOutcome, JoinError>> {
        self.tasks.join_next().await
    }

    /// Aborts every fetch that has not completed yet.
    pub fn cancel(&mut self) {
        self.tasks.abort_all();
    }
}
