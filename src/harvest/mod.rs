//! Harvest module - STAC catalog harvesting pipeline.
//!
//! This module provides the building blocks of a harvest run:
//! - **Profiles**: per-provider settings via [`ProviderProfile`] and [`providers`]
//! - **Retry**: bounded retry of transient fetch failures via [`retry`]
//! - **Traversal**: catalog walking via [`CatalogWalker`]
//! - **Transform**: item and collection branding via [`transform`]
//! - **Resume/Writer**: append-only JSONL output that a later run can resume
//! - **Pipeline**: the async coordinator via [`pipeline::HarvestPipeline`]
//! - **Collect**: a collection rebuilt from an existing items file via [`collect_into`]

pub mod collect;
pub mod item_list;
pub mod pipeline;
pub mod profile;
pub mod providers;
pub mod resume;
pub mod retry;
pub mod transform;
pub mod traverse;
pub mod writer;

// Re-export commonly used types
pub use profile::{
    CatalogLayout, CollectionIdRule, CollectionTemplate, DescriptionStyle, ProfileError,
    ProviderProfile, UrlRewrite,
};

pub use collect::{collect_into, CollectError, CollectOutcome};
pub use item_list::ItemListError;

pub use pipeline::{
    FailurePolicy, HarvestPipeline, HarvestStats, OutputPaths, PipelineError, DEFAULT_CONCURRENCY,
};

pub use retry::{fetch_with_retry, IsRetryable, RetryPolicy};
pub use transform::{TransformError, TransformOptions};
pub use traverse::{CatalogWalker, CollectionRef, TraverseError};
