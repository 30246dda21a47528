//! Catalog harvest pipeline executor.
//!
//! This module provides the [`HarvestPipeline`] coordinator that turns one
//! provider's catalog into two line-delimited JSON files:
//! - Resume from the existing collections file
//! - Bounded-parallel item fetching via [`FetchExecutor`]
//! - Per-item transformation and collection-level aggregation
//! - Staged item output so a collection is published all-or-nothing
//! - Item-list harvesting into a single templated collection
//! - Structured logging via `tracing`

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{FetchBatch, FetchExecutor};
use crate::harvest::item_list::{load_item_list, ItemListError};
use crate::harvest::profile::{CatalogLayout, ProfileError, ProviderProfile};
use crate::harvest::resume::{load_processed_ids, ResumeError};
use crate::harvest::retry::RetryPolicy;
use crate::harvest::transform::{
    aggregate_asset_summary, collection_from_template, finalize_collection, synthesize_collection,
    transform_item, ExtentAccumulator, TransformError, TransformOptions,
};
use crate::harvest::traverse::{CatalogWalker, CollectionRef, TraverseError};
use crate::harvest::writer::{CollectionStage, JsonlAppender, WriterError};
use crate::model::{AssetSummary, CatalogNode, Collection, Item};
use crate::traits::{DocumentSource, FetchError, ParseError};

/// Default size of the fetch worker pool.
pub const DEFAULT_CONCURRENCY: usize = 50;

// ============================================================================
// Pipeline Types
// ============================================================================

/// Where the two output files live.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub collections: PathBuf,
    pub items: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            collections: PathBuf::from("collections.json"),
            items: PathBuf::from("items.json"),
        }
    }
}

/// What to do when an item cannot be fetched even after retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the item and carry on with the rest of the collection.
    SkipItem,

    /// Drop the collection's staged items, write no collection line, and move
    /// on to the next collection. A later run picks it up again.
    AbortCollection,

    /// Cancel in-flight fetches and stop the run.
    #[default]
    AbortRun,
}

/// Statistics about one pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    /// Collections found under the root catalog
    pub collections_found: usize,

    /// Collections already present in the collections file
    pub collections_skipped: usize,

    /// Collection lines written by this run
    pub collections_written: usize,

    /// Collections abandoned under [`FailurePolicy::AbortCollection`]
    pub collections_failed: usize,

    /// Item lines written by this run
    pub items_written: usize,

    /// Items dropped because they could not be fetched or parsed
    pub items_skipped: usize,

    /// Wall time of the run (milliseconds)
    pub total_duration_ms: u64,
}

enum CollectionOutcome {
    Written { items: usize, skipped: usize },
    Abandoned { skipped: usize },
}

enum Staged {
    Ready { record: Collection, skipped: usize },
    Abandoned { skipped: usize },
}

/// One collection to harvest, keyed by its output ID.
struct Target {
    id: String,
    source: TargetSource,
}

enum TargetSource {
    Catalog {
        collection: CollectionRef,
        node: CatalogNode,
    },
    ItemList(Vec<String>),
}

/// Completion-ordered source of raw item documents for one collection.
enum ItemFeed {
    Pool(FetchBatch),
    Inline(std::vec::IntoIter<(String, Value)>),
}

impl ItemFeed {
    async fn next(&mut self) -> Option<Result<(String, Result<Value, FetchError>), PipelineError>> {
        match self {
            ItemFeed::Pool(batch) => batch.next().await.map(|joined| {
                joined
                    .map(|outcome| (outcome.url, outcome.result))
                    .map_err(|e| PipelineError::TaskJoin(e.to_string()))
            }),
            ItemFeed::Inline(features) => features.next().map(|(url, doc)| Ok((url, Ok(doc)))),
        }
    }

    fn cancel(&mut self) {
        if let ItemFeed::Pool(batch) = self {
            batch.cancel();
        }
    }
}

/// Logs fetch progress at every 10% step.
struct Progress<'a> {
    collection: &'a str,
    total: usize,
    done: usize,
    next_step: usize,
}

impl<'a> Progress<'a> {
    fn new(collection: &'a str, total: usize) -> Self {
        Self {
            collection,
            total,
            done: 0,
            next_step: 1,
        }
    }

    fn tick(&mut self) {
        self.done += 1;
        if self.total == 0 {
            return;
        }
        let percent = self.done * 100 / self.total;
        if percent >= self.next_step * 10 || self.done == self.total {
            info!(
                collection = self.collection,
                done = self.done,
                total = self.total,
                percent,
                "Fetching items"
            );
            self.next_step = percent / 10 + 1;
        }
    }
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that stop a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Resume(#[from] ResumeError),

    #[error(transparent)]
    Traverse(#[from] TraverseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// An item fetch exhausted its retries under [`FailurePolicy::AbortRun`]
    #[error("Item {url} of collection '{collection}' could not be fetched: {source}")]
    ItemFetch {
        collection: String,
        url: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    ItemList(#[from] ItemListError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("Fetch task failed: {0}")]
    TaskJoin(String),
}

impl PipelineError {
    /// Process exit status for this error.
    ///
    /// 3 fetch, 4 parse, 5 I/O, 6 configuration, 1 anything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Fetch(_)
            | PipelineError::ItemFetch { .. }
            | PipelineError::Traverse(TraverseError::Fetch(_)) => 3,
            PipelineError::Parse(_)
            | PipelineError::Traverse(TraverseError::Parse(_))
            | PipelineError::Resume(ResumeError::MalformedLine { .. }) => 4,
            PipelineError::Writer(_)
            | PipelineError::Resume(ResumeError::Io { .. })
            | PipelineError::ItemList(ItemListError::Io { .. }) => 5,
            PipelineError::Profile(_) | PipelineError::ItemList(ItemListError::InvalidUrl { .. }) => 6,
            PipelineError::TaskJoin(_) | PipelineError::Traverse(TraverseError::Join(_)) => 1,
        }
    }
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Harvest pipeline for one provider profile.
///
/// Collections are processed one at a time in catalog order. Within a
/// collection, item documents are fetched concurrently and handled in the
/// order they complete; all writes happen on the calling task.
///
/// # Example
///
/// ```ignore
/// use stac_harvester::harvest::{HarvestPipeline, OutputPaths, ProviderProfile};
/// use stac_harvester::source::HttpSource;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = HarvestPipeline::new(HttpSource::new()?, ProviderProfile::builtin("linz")?)
///         .with_concurrency(20);
///
///     let stats = pipeline.run(&OutputPaths::default()).await?;
///     println!("Wrote {} collections", stats.collections_written);
///     Ok(())
/// }
/// ```
pub struct HarvestPipeline<S: DocumentSource> {
    source: Arc<S>,
    profile: ProviderProfile,
    options: TransformOptions,
    concurrency: usize,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
}

impl<S> HarvestPipeline<S>
where
    S: DocumentSource + 'static,
{
    /// Creates a pipeline with default settings:
    /// - 50 concurrent fetches
    /// - 3 attempts per fetch, 1 second apart
    /// - abort the run on an unrecoverable item fetch
    pub fn new(source: S, profile: ProviderProfile) -> Self {
        Self::from_shared(Arc::new(source), profile)
    }

    pub fn from_shared(source: Arc<S>, profile: ProviderProfile) -> Self {
        Self {
            source,
            profile,
            options: TransformOptions::default(),
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_options(mut self, options: TransformOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the size of the fetch worker pool.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Harvests every collection not yet present in `paths.collections`.
    ///
    /// A collection whose record cannot be built (e.g. a bare catalog with no
    /// usable items) is abandoned and counted in
    /// [`HarvestStats::collections_failed`]; the run moves on to the next one.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the root catalog, a collection's link
    /// tree or the item list cannot be read, if an output file cannot be
    /// written, or if an item fetch fails under [`FailurePolicy::AbortRun`].
    #[instrument(skip(self, paths), fields(provider = %self.profile.name))]
    pub async fn run(&self, paths: &OutputPaths) -> Result<HarvestStats, PipelineError> {
        let start = Instant::now();
        let mut stats = HarvestStats::default();

        let processed = load_processed_ids(&paths.collections).await?;
        if !processed.is_empty() {
            info!(
                count = processed.len(),
                path = %paths.collections.display(),
                "Collections already found"
            );
        }

        let walker = CatalogWalker::new(
            Arc::clone(&self.source),
            FetchExecutor::new(self.concurrency, self.retry),
        );

        let targets = self.discover(&walker).await?;
        stats.collections_found = targets.len();

        let mut collections_out = JsonlAppender::open(&paths.collections).await?;
        let mut items_out = JsonlAppender::open(&paths.items).await?;

        for target in &targets {
            if processed.contains(&target.id) {
                debug!(collection = %target.id, "Already harvested, skipping");
                stats.collections_skipped += 1;
                continue;
            }

            info!(collection = %target.id, "Looking for items");

            let outcome = self
                .harvest_collection(&walker, target, paths, &mut collections_out, &mut items_out)
                .await?;

            match outcome {
                CollectionOutcome::Written { items, skipped } => {
                    stats.collections_written += 1;
                    stats.items_written += items;
                    stats.items_skipped += skipped;
                    info!(collection = %target.id, items, skipped, "Collection written");
                }
                CollectionOutcome::Abandoned { skipped } => {
                    stats.collections_failed += 1;
                    stats.items_skipped += skipped;
                }
            }
        }

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            found = stats.collections_found,
            skipped = stats.collections_skipped,
            written = stats.collections_written,
            failed = stats.collections_failed,
            items = stats.items_written,
            items_skipped = stats.items_skipped,
            duration_ms = stats.total_duration_ms,
            "Harvest completed"
        );

        Ok(stats)
    }

    /// Collections to harvest, in catalog (or list) order.
    async fn discover(&self, walker: &CatalogWalker<S>) -> Result<Vec<Target>, PipelineError> {
        if let CatalogLayout::ItemList { list_path } = &self.profile.layout {
            let urls = load_item_list(list_path).await?;
            info!(path = %list_path.display(), items = urls.len(), "Loaded item list");
            return Ok(vec![Target {
                id: self.profile.collection_id_for(""),
                source: TargetSource::ItemList(urls),
            }]);
        }

        info!(root = %self.profile.root_url, "Connecting to static catalog");
        let mut collections = walker.enumerate_collections(&self.profile.root_url).await?;
        if let CatalogLayout::Search {
            upstream_collection,
            ..
        } = &self.profile.layout
        {
            collections.retain(|collection| {
                collection
                    .document
                    .get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| id == upstream_collection)
            });
        }

        collections
            .into_iter()
            .map(|collection| -> Result<Target, PipelineError> {
                let node = collection.node()?;
                Ok(Target {
                    id: self.profile.collection_id_for(&node.id),
                    source: TargetSource::Catalog { collection, node },
                })
            })
            .collect()
    }

    async fn harvest_collection(
        &self,
        walker: &CatalogWalker<S>,
        target: &Target,
        paths: &OutputPaths,
        collections_out: &mut JsonlAppender,
        items_out: &mut JsonlAppender,
    ) -> Result<CollectionOutcome, PipelineError> {
        let mut stage = CollectionStage::begin(&paths.items, &target.id).await?;

        // Every failure path below must discard the stage before returning.
        let filled = self.fill_stage(walker, target, &mut stage).await;

        let (record, skipped) = match filled {
            Ok(Staged::Ready { record, skipped }) => (record, skipped),
            Ok(Staged::Abandoned { skipped }) => {
                stage.discard().await?;
                return Ok(CollectionOutcome::Abandoned { skipped });
            }
            Err(e) => {
                if let Err(discard_error) = stage.discard().await {
                    warn!(error = %discard_error, "Failed to remove staging file");
                }
                return Err(e);
            }
        };

        let items = stage.publish(items_out).await?;
        collections_out.append(&record).await?;
        collections_out.flush().await?;

        Ok(CollectionOutcome::Written { items, skipped })
    }

    /// Fetches, transforms, and stages every item of one collection, then
    /// builds the collection record.
    async fn fill_stage(
        &self,
        walker: &CatalogWalker<S>,
        target: &Target,
        stage: &mut CollectionStage,
    ) -> Result<Staged, PipelineError> {
        let collection_id = target.id.as_str();
        let (source_document, mut feed, total) = self.open_feed(walker, target).await?;

        let mut summary = AssetSummary::new();
        let mut extent = ExtentAccumulator::new();
        let mut progress = Progress::new(collection_id, total);
        let mut skipped = 0;

        while let Some(next) = feed.next().await {
            let (url, result) = next?;
            progress.tick();

            let document = match result {
                Ok(document) => document,
                Err(source) => match self.failure_policy {
                    FailurePolicy::SkipItem => {
                        warn!(collection = collection_id, url = %url, error = %source, "Skipping item");
                        skipped += 1;
                        continue;
                    }
                    FailurePolicy::AbortCollection => {
                        feed.cancel();
                        error!(
                            collection = collection_id,
                            url = %url,
                            error = %source,
                            "Abandoning collection"
                        );
                        return Ok(Staged::Abandoned { skipped: skipped + 1 });
                    }
                    FailurePolicy::AbortRun => {
                        feed.cancel();
                        return Err(PipelineError::ItemFetch {
                            collection: collection_id.to_string(),
                            url,
                            source,
                        });
                    }
                },
            };

            let item: Item = match serde_json::from_value(document) {
                Ok(item) => item,
                Err(e) => {
                    warn!(
                        collection = collection_id,
                        error = %ParseError::json(&url, e),
                        "Skipping malformed item"
                    );
                    skipped += 1;
                    continue;
                }
            };

            let item = transform_item(item, &url, collection_id, &self.profile, &self.options);
            aggregate_asset_summary(&mut summary, &item.assets);
            extent.add_item(&item);
            stage.stage(&item).await?;
        }

        match self.build_collection(target, source_document, &summary, &extent) {
            Ok(record) => Ok(Staged::Ready { record, skipped }),
            Err(e) => {
                error!(collection = collection_id, error = %e, "Abandoning collection");
                Ok(Staged::Abandoned { skipped })
            }
        }
    }

    /// Returns the collection document to brand (if any), the item feed, and
    /// the number of items the feed will yield.
    async fn open_feed(
        &self,
        walker: &CatalogWalker<S>,
        target: &Target,
    ) -> Result<(Option<Value>, ItemFeed, usize), PipelineError> {
        let collection = match &target.source {
            TargetSource::ItemList(urls) => {
                let total = urls.len();
                return Ok((None, self.pool(urls.clone()), total));
            }
            TargetSource::Catalog { collection, .. } => collection,
        };

        if let CatalogLayout::Search {
            collection_url,
            search_url,
            query,
            ..
        } = &self.profile.layout
        {
            let document = walker.fetch(collection_url).await?;
            let response = walker.search(search_url, query).await?;
            let features: Vec<(String, Value)> = response
                .get("features")
                .and_then(Value::as_array)
                .map(|features| {
                    features
                        .iter()
                        .map(|feature| (search_url.clone(), feature.clone()))
                        .collect()
                })
                .unwrap_or_default();
            let total = features.len();
            return Ok((Some(document), ItemFeed::Inline(features.into_iter()), total));
        }

        let urls = walker.enumerate_items(collection).await?;
        let total = urls.len();
        Ok((Some(collection.document.clone()), self.pool(urls), total))
    }

    fn pool(&self, urls: Vec<String>) -> ItemFeed {
        let executor = FetchExecutor::new(self.concurrency, self.retry);
        ItemFeed::Pool(executor.spawn_all(Arc::clone(&self.source), urls))
    }

    fn build_collection(
        &self,
        target: &Target,
        document: Option<Value>,
        summary: &AssetSummary,
        extent: &ExtentAccumulator,
    ) -> Result<Collection, TransformError> {
        let (collection, node) = match &target.source {
            TargetSource::ItemList(_) => {
                return collection_from_template(
                    &target.id,
                    &self.profile.template(),
                    summary,
                    extent,
                    &self.profile,
                    self.options.with_assets_extension,
                )
            }
            TargetSource::Catalog { collection, node } => (collection, node),
        };

        if node.is_collection() {
            if let Some(Ok(raw)) = document.map(serde_json::from_value::<Collection>) {
                return finalize_collection(
                    raw,
                    &target.id,
                    summary,
                    extent,
                    &self.profile,
                    &self.options,
                );
            }
            warn!(
                url = %collection.url,
                "Collection document unreadable, synthesizing one from its items"
            );
        }
        synthesize_collection(node, &target.id, summary, extent, &self.profile, &self.options)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::providers;
    use crate::testing::MemorySource;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    const ROOT: &str = "https://nz-imagery.s3-ap-southeast-2.amazonaws.com/catalog.json";
    const HOST: &str = "https://nz-imagery.s3-ap-southeast-2.amazonaws.com";

    fn item_doc(id: &str, bbox: [f64; 4], datetime: &str) -> Value {
        json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": id,
            "bbox": bbox,
            "properties": {"datetime": datetime},
            "links": [{"rel": "self", "href": format!("./{id}.json")}],
            "assets": {
                "visual": {"href": format!("./{id}.tiff"), "type": "image/tiff", "title": "Visual"}
            }
        })
    }

    fn collection_doc(id: &str, items: &[&str]) -> Value {
        let mut links = vec![json!({"rel": "root", "href": "../catalog.json"})];
        links.extend(
            items
                .iter()
                .map(|item| json!({"rel": "item", "href": format!("./{item}.json")})),
        );
        json!({
            "type": "Collection",
            "stac_version": "1.0.0",
            "id": id,
            "description": format!("Imagery for {id}"),
            "license": "CC-BY-4.0",
            "extent": {
                "spatial": {"bbox": [[0.0, 0.0, 1.0, 1.0]]},
                "temporal": {"interval": [["2023-01-01T00:00:00Z", null]]}
            },
            "links": links
        })
    }

    /// Root with two collections: `otago-rural` (items a, b) and
    /// `auckland-urban` (items c, d, e).
    fn linz_catalog() -> MemorySource {
        let source = MemorySource::new();
        source.insert(
            ROOT,
            json!({
                "type": "Catalog",
                "id": "nz-imagery",
                "links": [
                    {"rel": "child", "href": "./otago/collection.json"},
                    {"rel": "child", "href": "./auckland/collection.json"}
                ]
            }),
        );
        source.insert(
            &format!("{HOST}/otago/collection.json"),
            collection_doc("otago-rural", &["a", "b"]),
        );
        source.insert(
            &format!("{HOST}/auckland/collection.json"),
            collection_doc("auckland-urban", &["c", "d", "e"]),
        );
        source.insert(&format!("{HOST}/otago/a.json"), item_doc("a", [0.0, 0.0, 1.0, 1.0], "2023-01-05T00:00:00Z"));
        source.insert(&format!("{HOST}/otago/b.json"), item_doc("b", [2.0, 2.0, 3.0, 3.0], "2023-02-10T00:00:00Z"));
        source.insert(&format!("{HOST}/auckland/c.json"), item_doc("c", [0.0, 0.0, 1.0, 1.0], "2023-01-05T00:00:00Z"));
        source.insert(&format!("{HOST}/auckland/d.json"), item_doc("d", [0.0, 0.0, 1.0, 1.0], "2023-01-06T00:00:00Z"));
        source.insert(&format!("{HOST}/auckland/e.json"), item_doc("e", [0.0, 0.0, 1.0, 1.0], "2023-01-07T00:00:00Z"));
        source
    }

    fn paths(dir: &Path) -> OutputPaths {
        OutputPaths {
            collections: dir.join("collections.json"),
            items: dir.join("items.json"),
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        match std::fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn pipeline(source: Arc<MemorySource>) -> HarvestPipeline<MemorySource> {
        HarvestPipeline::from_shared(source, providers::linz())
            .with_concurrency(4)
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_resume_skips_processed_collection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        std::fs::write(
            &paths.collections,
            "{\"id\":\"LINZ_otago_rural\",\"description\":\"earlier run\"}\n",
        )
        .unwrap();

        let source = Arc::new(linz_catalog());
        let stats = pipeline(Arc::clone(&source)).run(&paths).await.unwrap();

        assert_eq!(stats.collections_found, 2);
        assert_eq!(stats.collections_skipped, 1);
        assert_eq!(stats.collections_written, 1);
        assert_eq!(stats.items_written, 3);

        let collections = read_lines(&paths.collections);
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0]["description"], "earlier run");
        assert_eq!(collections[1]["id"], "LINZ_auckland_urban");
        assert_eq!(
            collections[1]["description"],
            "LINZ OpenData | Imagery for auckland-urban"
        );
        assert_eq!(collections[1]["links"], json!([]));

        let items = read_lines(&paths.items);
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item["collection"] == "LINZ_auckland_urban"));

        assert_eq!(source.calls(&format!("{HOST}/otago/a.json")), 0);
        assert_eq!(source.calls(&format!("{HOST}/otago/b.json")), 0);
        assert!(!CollectionStage::staging_path(&paths.items, "LINZ_auckland_urban").exists());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let source = Arc::new(linz_catalog());
        let first = pipeline(Arc::clone(&source)).run(&paths).await.unwrap();
        assert_eq!(first.collections_written, 2);
        assert_eq!(first.items_written, 5);

        let second = pipeline(Arc::clone(&source)).run(&paths).await.unwrap();
        assert_eq!(second.collections_skipped, 2);
        assert_eq!(second.collections_written, 0);
        assert_eq!(second.items_written, 0);

        assert_eq!(read_lines(&paths.collections).len(), 2);
        assert_eq!(read_lines(&paths.items).len(), 5);
    }

    #[tokio::test]
    async fn test_assets_extension_and_s3_urls() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let source = Arc::new(linz_catalog());
        pipeline(source)
            .with_options(TransformOptions {
                with_s3_urls: true,
                with_assets_extension: true,
            })
            .run(&paths)
            .await
            .unwrap();

        let collections = read_lines(&paths.collections);
        let otago = collections
            .iter()
            .find(|c| c["id"] == "LINZ_otago_rural")
            .unwrap();
        assert_eq!(otago["item_assets"]["visual"]["title"], "Visual");
        assert_eq!(otago["item_assets"]["visual"]["roles"], json!(["data"]));

        for item in read_lines(&paths.items) {
            let visual = &item["assets"]["visual"];
            let href = visual["href"].as_str().unwrap();
            assert!(href.starts_with("s3://nz-imagery/"), "{href}");
            assert!(visual["alternate"]["public"]["href"]
                .as_str()
                .unwrap()
                .starts_with(HOST));
            assert_eq!(item["links"], json!([]));
        }
    }

    #[tokio::test]
    async fn test_abort_run_leaves_no_partial_collection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let source = linz_catalog();
        source.fail_transiently(&format!("{HOST}/auckland/d.json"), 100);
        let source = Arc::new(source);

        let err = pipeline(Arc::clone(&source)).run(&paths).await.unwrap_err();
        assert!(matches!(err, PipelineError::ItemFetch { ref collection, .. } if collection == "LINZ_auckland_urban"));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(source.calls(&format!("{HOST}/auckland/d.json")), 3);

        // otago completed before the failure; nothing of auckland survives.
        let collections = read_lines(&paths.collections);
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0]["id"], "LINZ_otago_rural");
        let items = read_lines(&paths.items);
        assert_eq!(items.len(), 2);
        assert!(!CollectionStage::staging_path(&paths.items, "LINZ_auckland_urban").exists());
    }

    #[tokio::test]
    async fn test_abort_collection_moves_on() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let source = linz_catalog();
        source.fail_transiently(&format!("{HOST}/otago/a.json"), 100);
        let source = Arc::new(source);

        let stats = pipeline(source)
            .with_failure_policy(FailurePolicy::AbortCollection)
            .run(&paths)
            .await
            .unwrap();

        assert_eq!(stats.collections_failed, 1);
        assert_eq!(stats.collections_written, 1);
        let collections = read_lines(&paths.collections);
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0]["id"], "LINZ_auckland_urban");
        assert_eq!(read_lines(&paths.items).len(), 3);
    }

    #[tokio::test]
    async fn test_skip_item_keeps_collection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let source = linz_catalog();
        source.fail_transiently(&format!("{HOST}/otago/a.json"), 100);
        let source = Arc::new(source);

        let stats = pipeline(source)
            .with_failure_policy(FailurePolicy::SkipItem)
            .run(&paths)
            .await
            .unwrap();

        assert_eq!(stats.collections_written, 2);
        assert_eq!(stats.items_written, 4);
        assert_eq!(stats.items_skipped, 1);
    }

    #[tokio::test]
    async fn test_transient_item_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let source = linz_catalog();
        source.fail_transiently(&format!("{HOST}/otago/b.json"), 2);
        let source = Arc::new(source);

        let stats = pipeline(Arc::clone(&source)).run(&paths).await.unwrap();
        assert_eq!(stats.items_written, 5);
        assert_eq!(source.calls(&format!("{HOST}/otago/b.json")), 3);
    }

    #[tokio::test]
    async fn test_malformed_item_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let source = linz_catalog();
        source.insert(&format!("{HOST}/otago/a.json"), json!({"id": "a", "properties": {}}));
        let source = Arc::new(source);

        let stats = pipeline(source).run(&paths).await.unwrap();
        assert_eq!(stats.items_skipped, 1);
        assert_eq!(stats.items_written, 4);
        assert_eq!(stats.collections_written, 2);
    }

    #[tokio::test]
    async fn test_root_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new());

        let err = pipeline(source).run(&paths(dir.path())).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Traverse(TraverseError::Fetch(FetchError::Status { status: 404, .. }))
        ));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_umbra_nested_catalog_synthesizes_collection() {
        let base = "https://umbra.example/stac";
        let source = MemorySource::new();
        source.insert(
            &format!("{base}/catalog.json"),
            json!({"type": "Catalog", "id": "umbra", "links": [
                {"rel": "child", "href": "./sar-data/catalog.json"}
            ]}),
        );
        source.insert(
            &format!("{base}/sar-data/catalog.json"),
            json!({"type": "Catalog", "id": "sar-data", "links": [
                {"rel": "child", "href": "./2023/catalog.json"}
            ]}),
        );
        source.insert(
            &format!("{base}/sar-data/2023/catalog.json"),
            json!({"type": "Catalog", "id": "2023", "links": [
                {"rel": "item", "href": "./one.json"},
                {"rel": "item", "href": "./two.json"}
            ]}),
        );
        source.insert(
            &format!("{base}/sar-data/2023/one.json"),
            item_doc("one", [0.0, 0.0, 1.0, 1.0], "2023-01-05T00:00:00Z"),
        );
        source.insert(
            &format!("{base}/sar-data/2023/two.json"),
            item_doc("two", [2.0, 2.0, 3.0, 3.0], "2023-02-10T00:00:00Z"),
        );

        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let profile = providers::umbra().with_root_url(format!("{base}/catalog.json"));
        HarvestPipeline::new(source, profile)
            .with_retry(RetryPolicy::new(1, Duration::ZERO))
            .with_options(TransformOptions {
                with_s3_urls: false,
                with_assets_extension: true,
            })
            .run(&paths)
            .await
            .unwrap();

        let collections = read_lines(&paths.collections);
        assert_eq!(collections.len(), 1);
        let collection = &collections[0];
        assert_eq!(collection["id"], "UMBRA_sar-data");
        assert_eq!(collection["license"], "CC-BY-4.0");
        assert_eq!(collection["extent"]["spatial"]["bbox"], json!([[0.0, 0.0, 3.0, 3.0]]));
        assert_eq!(
            collection["extent"]["temporal"]["interval"],
            json!([["2023-01-05T00:00:00Z", "2023-02-10T00:00:00Z"]])
        );
        assert_eq!(collection["item_assets"]["visual"]["type"], "image/tiff");
        assert_eq!(read_lines(&paths.items).len(), 2);
    }

    #[tokio::test]
    async fn test_search_layout_uses_features() {
        // Search endpoints follow the overridden root.
        let profile = providers::sentinel_2_iceland().with_root_url("https://api.example/v1/");

        let source = MemorySource::new();
        source.insert(
            "https://api.example/v1/",
            json!({"type": "Catalog", "id": "earth-search", "links": [
                {"rel": "child", "href": "collections/sentinel-2-l2a"},
                {"rel": "child", "href": "collections/landsat-c2-l2"}
            ]}),
        );
        let upstream = json!({
            "type": "Collection",
            "id": "sentinel-2-l2a",
            "description": "Global",
            "extent": {
                "spatial": {"bbox": [[-180.0, -90.0, 180.0, 90.0]]},
                "temporal": {"interval": [["2015-06-27T10:25:31Z", null]]}
            }
        });
        source.insert("https://api.example/v1/collections/sentinel-2-l2a", upstream);
        source.insert(
            "https://api.example/v1/collections/landsat-c2-l2",
            json!({"type": "Collection", "id": "landsat-c2-l2", "description": "Landsat"}),
        );
        source.insert_search(
            "https://api.example/v1/search",
            json!({"type": "FeatureCollection", "features": [
                {
                    "id": "S2B_1",
                    "bbox": [-20.0, 64.0, -19.0, 65.0],
                    "properties": {"datetime": "2023-07-04T13:06:11Z", "s2:tile": "x"},
                    "assets": {
                        "red": {"href": "https://sentinel-cogs.s3.us-west-2.amazonaws.com/sentinel-s2-l2a-cogs/B04.tif"},
                        "red-jp2": {"href": "s3://sentinel-s2-l2a/B04.jp2"}
                    }
                }
            ]}),
        );

        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let stats = HarvestPipeline::new(source, profile)
            .with_retry(RetryPolicy::new(1, Duration::ZERO))
            .with_options(TransformOptions {
                with_s3_urls: true,
                with_assets_extension: false,
            })
            .run(&paths)
            .await
            .unwrap();

        assert_eq!(stats.collections_found, 1);
        let collections = read_lines(&paths.collections);
        assert_eq!(collections[0]["id"], "sentinel-2-iceland");
        assert_eq!(
            collections[0]["extent"]["spatial"]["bbox"],
            json!([[-24.95, 63.38, -13.99, 66.56]])
        );

        let items = read_lines(&paths.items);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["collection"], "sentinel-2-iceland");
        assert_eq!(
            items[0]["assets"]["red"]["href"],
            "s3://sentinel-cogs/sentinel-s2-l2a-cogs/B04.tif"
        );
        assert!(items[0]["assets"].get("red-jp2").is_none());
        assert!(items[0]["properties"].get("s2:tile").is_none());
    }

    fn umbra_root(base: &str, children: &[&str]) -> MemorySource {
        let source = MemorySource::new();
        let links: Vec<Value> = children
            .iter()
            .map(|child| json!({"rel": "child", "href": format!("./{child}/catalog.json")}))
            .collect();
        source.insert(
            &format!("{base}/catalog.json"),
            json!({"type": "Catalog", "id": "umbra", "links": links}),
        );
        source
    }

    #[tokio::test]
    async fn test_empty_catalog_does_not_block_later_collections() {
        let base = "https://umbra.example/stac";
        let source = umbra_root(base, &["empty", "full"]);
        source.insert(
            &format!("{base}/empty/catalog.json"),
            json!({"type": "Catalog", "id": "empty", "links": []}),
        );
        source.insert(
            &format!("{base}/full/catalog.json"),
            json!({"type": "Catalog", "id": "full", "links": [
                {"rel": "item", "href": "./one.json"}
            ]}),
        );
        source.insert(
            &format!("{base}/full/one.json"),
            item_doc("one", [0.0, 0.0, 1.0, 1.0], "2023-01-05T00:00:00Z"),
        );
        let source = Arc::new(source);

        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let profile = providers::umbra().with_root_url(format!("{base}/catalog.json"));
        let pipeline = HarvestPipeline::from_shared(Arc::clone(&source), profile)
            .with_retry(RetryPolicy::new(1, Duration::ZERO));

        let first = pipeline.run(&paths).await.unwrap();
        assert_eq!(first.collections_failed, 1);
        assert_eq!(first.collections_written, 1);
        assert!(!CollectionStage::staging_path(&paths.items, "UMBRA_empty").exists());

        let second = pipeline.run(&paths).await.unwrap();
        assert_eq!(second.collections_failed, 1);
        assert_eq!(second.collections_skipped, 1);
        assert_eq!(second.collections_written, 0);

        let collections = read_lines(&paths.collections);
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0]["id"], "UMBRA_full");
        assert_eq!(read_lines(&paths.items).len(), 1);
        assert_eq!(source.calls(&format!("{base}/full/one.json")), 1);
    }

    #[tokio::test]
    async fn test_all_items_skipped_abandons_bare_catalog() {
        let base = "https://umbra.example/stac";
        let source = umbra_root(base, &["flaky", "full"]);
        source.insert(
            &format!("{base}/flaky/catalog.json"),
            json!({"type": "Catalog", "id": "flaky", "links": [
                {"rel": "item", "href": "./gone.json"}
            ]}),
        );
        source.insert(
            &format!("{base}/full/catalog.json"),
            json!({"type": "Catalog", "id": "full", "links": [
                {"rel": "item", "href": "./one.json"}
            ]}),
        );
        source.insert(
            &format!("{base}/full/one.json"),
            item_doc("one", [0.0, 0.0, 1.0, 1.0], "2023-01-05T00:00:00Z"),
        );

        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let profile = providers::umbra().with_root_url(format!("{base}/catalog.json"));
        let stats = HarvestPipeline::new(source, profile)
            .with_retry(RetryPolicy::new(1, Duration::ZERO))
            .with_failure_policy(FailurePolicy::SkipItem)
            .run(&paths)
            .await
            .unwrap();

        assert_eq!(stats.collections_failed, 1);
        assert_eq!(stats.collections_written, 1);
        assert_eq!(stats.items_skipped, 1);
        assert_eq!(read_lines(&paths.collections)[0]["id"], "UMBRA_full");
    }

    #[tokio::test]
    async fn test_item_list_builds_templated_collection() {
        let event = "https://maxar-opendata.s3.amazonaws.com/events/WildFires-LosAngeles-Jan-2025/ard/11";
        let source = MemorySource::new();
        source.insert(
            &format!("{event}/031311/2025-01-10/a.json"),
            item_doc("11/031311/a", [-118.7, 34.0, -118.5, 34.1], "2025-01-10T18:50:14Z"),
        );
        source.insert(
            &format!("{event}/031313/2025-01-08/b.json"),
            item_doc("11/031313/b", [-118.6, 33.9, -118.4, 34.2], "2025-01-08T19:01:52Z"),
        );
        let source = Arc::new(source);

        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let list = dir.path().join("list_items.txt");
        std::fs::write(
            &list,
            format!("{event}/031311/2025-01-10/a.json\n{event}/031313/2025-01-08/b.json\n"),
        )
        .unwrap();

        let profile = providers::maxar().with_item_list(&list, "WildFires-LosAngeles-Jan-2025");
        let pipeline = HarvestPipeline::from_shared(Arc::clone(&source), profile)
            .with_retry(RetryPolicy::new(1, Duration::ZERO))
            .with_options(TransformOptions {
                with_s3_urls: true,
                with_assets_extension: true,
            });

        let stats = pipeline.run(&paths).await.unwrap();
        assert_eq!(stats.collections_found, 1);
        assert_eq!(stats.items_written, 2);

        let items = read_lines(&paths.items);
        assert!(items
            .iter()
            .all(|item| item["collection"] == "WildFires-LosAngeles-Jan-2025"));
        assert!(items.iter().any(|item| item["id"] == "11_031311_a"));
        assert!(items[0]["assets"]["visual"]["href"]
            .as_str()
            .unwrap()
            .starts_with("s3://maxar-opendata/events/WildFires-LosAngeles-Jan-2025/"));

        let collections = read_lines(&paths.collections);
        assert_eq!(collections.len(), 1);
        let collection = &collections[0];
        assert_eq!(collection["id"], "WildFires-LosAngeles-Jan-2025");
        assert_eq!(collection["description"], "Maxar OpenData");
        assert_eq!(collection["license"], "CC-BY-NC-4.0");
        assert_eq!(collection["renders"]["visual"]["assets"], json!(["visual"]));
        assert_eq!(
            collection["extent"]["spatial"]["bbox"],
            json!([[-118.7, 33.9, -118.4, 34.2]])
        );
        assert_eq!(collection["item_assets"]["visual"]["title"], "Visual");

        let rerun = pipeline.run(&paths).await.unwrap();
        assert_eq!(rerun.collections_skipped, 1);
        assert_eq!(source.calls(&format!("{event}/031311/2025-01-10/a.json")), 1);
    }

    #[tokio::test]
    async fn test_missing_item_list_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let profile = providers::maxar().with_item_list(dir.path().join("nope.txt"), "X");
        let err = HarvestPipeline::new(MemorySource::new(), profile)
            .run(&paths(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ItemList(ItemListError::Io { .. })));
        assert_eq!(err.exit_code(), 5);
    }

}
