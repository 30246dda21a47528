//! Catalog traversal.
//!
//! Catalogs are walked one level at a time: every child document of the
//! current level is fetched through the shared [`FetchExecutor`], and item
//! links are only collected from leaf nodes (nodes with no child links).
//! That covers flat layouts (collection → items) as well as time-partitioned
//! ones (catalog → year → month → day → items) of any depth.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::executor::FetchExecutor;
use crate::harvest::retry::fetch_with_retry;
use crate::model::{CatalogNode, Link};
use crate::traits::{DocumentSource, FetchError, ParseError};

#[derive(Error, Debug)]
pub enum TraverseError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Fetch task failed: {0}")]
    Join(String),
}

/// A collection (or bare catalog) found under the root, with the URL it was
/// fetched from.
#[derive(Debug, Clone)]
pub struct CollectionRef {
    pub url: String,
    pub document: Value,
}

impl CollectionRef {
    pub fn node(&self) -> Result<CatalogNode, ParseError> {
        serde_json::from_value(self.document.clone()).map_err(|e| ParseError::json(&self.url, e))
    }
}

/// Resolves a link href relative to the document that contains it.
pub fn resolve_href(base_url: &str, link: &Link) -> Result<String, ParseError> {
    let invalid = |message: String| ParseError::InvalidLink {
        url: base_url.to_string(),
        href: link.href.clone(),
        message,
    };
    let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    base.join(&link.href)
        .map(|url| url.to_string())
        .map_err(|e| invalid(e.to_string()))
}

pub struct CatalogWalker<S: DocumentSource> {
    source: Arc<S>,
    executor: FetchExecutor,
}

impl<S> CatalogWalker<S>
where
    S: DocumentSource + 'static,
{
    pub fn new(source: Arc<S>, executor: FetchExecutor) -> Self {
        Self { source, executor }
    }

    /// Single document fetch with the executor's retry policy.
    pub async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let source = &self.source;
        fetch_with_retry(self.executor.retry_policy(), move || source.get_json(url)).await
    }

    /// Search request with the executor's retry policy.
    pub async fn search(&self, url: &str, body: &Value) -> Result<Value, FetchError> {
        let source = &self.source;
        fetch_with_retry(self.executor.retry_policy(), move || source.post_json(url, body)).await
    }

    /// Children of the root catalog, in link order.
    #[instrument(skip(self))]
    pub async fn enumerate_collections(
        &self,
        root_url: &str,
    ) -> Result<Vec<CollectionRef>, TraverseError> {
        let document = self.fetch(root_url).await?;
        let root: CatalogNode =
            serde_json::from_value(document).map_err(|e| ParseError::json(root_url, e))?;

        let urls = root
            .child_links()
            .map(|link| resolve_href(root_url, link))
            .collect::<Result<Vec<_>, _>>()?;

        info!(root = %root.id, children = urls.len(), "Connected to static catalog");

        let documents = self.fetch_all(urls).await?;
        Ok(documents
            .into_iter()
            .map(|(url, document)| CollectionRef { url, document })
            .collect())
    }

    /// Item URLs under `collection`, gathered from its leaf nodes.
    #[instrument(skip(self, collection), fields(url = %collection.url))]
    pub async fn enumerate_items(
        &self,
        collection: &CollectionRef,
    ) -> Result<Vec<String>, TraverseError> {
        let mut visited = HashSet::from([collection.url.clone()]);
        let mut level = vec![(collection.url.clone(), collection.node()?)];
        let mut items = Vec::new();
        let mut depth = 0;

        while !level.is_empty() {
            let mut next_urls = Vec::new();

            for (url, node) in &level {
                if node.is_leaf() {
                    for link in node.item_links() {
                        items.push(resolve_href(url, link)?);
                    }
                    continue;
                }
                for link in node.child_links() {
                    let child = resolve_href(url, link)?;
                    if visited.insert(child.clone()) {
                        next_urls.push(child);
                    }
                }
            }

            debug!(depth, nodes = level.len(), children = next_urls.len(), "Walked catalog level");

            level = self
                .fetch_all(next_urls)
                .await?
                .into_iter()
                .map(|(url, document)| {
                    serde_json::from_value::<CatalogNode>(document)
                        .map(|node| (url.clone(), node))
                        .map_err(|e| ParseError::json(&url, e))
                })
                .collect::<Result<Vec<_>, _>>()?;
            depth += 1;
        }

        Ok(items)
    }

    /// Fetches every URL through the worker pool and returns the documents
    /// in input order. The first failure cancels the rest.
    async fn fetch_all(&self, urls: Vec<String>) -> Result<Vec<(String, Value)>, TraverseError> {
        let mut slots: Vec<Option<(String, Value)>> = vec![None; urls.len()];
        let mut batch = self.executor.spawn_all(Arc::clone(&self.source), urls);

        while let Some(joined) = batch.next().await {
            let outcome = joined.map_err(|e| TraverseError::Join(e.to_string()))?;
            let document = outcome.result?;
            slots[outcome.index] = Some((outcome.url, document));
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
