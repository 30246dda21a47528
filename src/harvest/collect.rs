//! Collections built after the fact from an existing items file.
//!
//! Reads the item lines that belong to one collection ID, folds them into an
//! asset summary and an extent, and appends the resulting collection line.
//! Items without a `collection` field are counted in as well.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument};

use crate::harvest::pipeline::OutputPaths;
use crate::harvest::profile::ProviderProfile;
use crate::harvest::resume::{load_processed_ids, ResumeError};
use crate::harvest::transform::{
    aggregate_asset_summary, collection_from_template, ExtentAccumulator, TransformError,
};
use crate::harvest::writer::{JsonlAppender, WriterError};
use crate::model::{AssetSummary, Collection, Item};

#[derive(Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Resume(#[from] ResumeError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: not a STAC item: {source}")]
    MalformedItem {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Writer(#[from] WriterError),
}

impl CollectError {
    /// Same mapping as the harvest run: 4 for bad data, 5 for I/O.
    pub fn exit_code(&self) -> u8 {
        match self {
            CollectError::MalformedItem { .. }
            | CollectError::Transform(_)
            | CollectError::Resume(ResumeError::MalformedLine { .. }) => 4,
            CollectError::Io { .. }
            | CollectError::Writer(_)
            | CollectError::Resume(ResumeError::Io { .. }) => 5,
        }
    }
}

#[derive(Debug)]
pub enum CollectOutcome {
    Written { collection: Collection, items: usize },
    /// The collections file already has this ID; nothing was written.
    AlreadyPresent,
}

/// Builds `collection_id` from the items in `items_path`.
pub async fn collection_from_items_file(
    items_path: &Path,
    collection_id: &str,
    profile: &ProviderProfile,
) -> Result<(Collection, usize), CollectError> {
    let io_error = |source| CollectError::Io {
        path: items_path.to_path_buf(),
        source,
    };
    let file = tokio::fs::File::open(items_path).await.map_err(io_error)?;
    let mut lines = BufReader::new(file).lines();

    let mut summary = AssetSummary::new();
    let mut extent = ExtentAccumulator::new();
    let mut matched = 0;
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await.map_err(io_error)? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let item: Item =
            serde_json::from_str(&line).map_err(|source| CollectError::MalformedItem {
                path: items_path.to_path_buf(),
                line: line_number,
                source,
            })?;
        if item
            .collection
            .as_deref()
            .is_some_and(|id| id != collection_id)
        {
            continue;
        }
        aggregate_asset_summary(&mut summary, &item.assets);
        extent.add_item(&item);
        matched += 1;
    }

    let collection = collection_from_template(
        collection_id,
        &profile.template(),
        &summary,
        &extent,
        profile,
        true,
    )?;
    Ok((collection, matched))
}

/// Builds the collection and appends it to `paths.collections`, unless a
/// previous run already wrote it.
#[instrument(skip(paths, profile), fields(items = %paths.items.display()))]
pub async fn collect_into(
    paths: &OutputPaths,
    collection_id: &str,
    profile: &ProviderProfile,
) -> Result<CollectOutcome, CollectError> {
    if load_processed_ids(&paths.collections)
        .await?
        .contains(collection_id)
    {
        info!(collection = collection_id, "Collection already present, skipping");
        return Ok(CollectOutcome::AlreadyPresent);
    }

    let (collection, items) =
        collection_from_items_file(&paths.items, collection_id, profile).await?;

    let mut out = JsonlAppender::open(&paths.collections).await?;
    out.append(&collection).await?;
    out.flush().await?;

    info!(collection = collection_id, items, "Collection written");
    Ok(CollectOutcome::Written { collection, items })
}
