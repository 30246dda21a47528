//! Record transformation: raw STAC documents → provider-branded records.
//!
//! Everything here is pure. The pipeline feeds items through
//! [`transform_item`] one at a time, folds them into an [`AssetSummary`] and an
//! [`ExtentAccumulator`], and calls [`finalize_collection`] (or
//! [`synthesize_collection`] for bare catalogs) once the collection's items
//! are exhausted.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

use crate::harvest::profile::{CollectionTemplate, ProviderProfile};
use crate::model::{
    declare_extension, AlternateHref, Asset, AssetSummary, AssetTemplate, CatalogNode, Collection,
    Extent, Item, SpatialExtent, TemporalExtent,
};

pub const ALTERNATE_ASSETS_EXTENSION: &str =
    "https://stac-extensions.github.io/alternate-assets/v1.1.0/schema.json";
pub const ITEM_ASSETS_EXTENSION: &str =
    "https://stac-extensions.github.io/item-assets/v1.0.0/schema.json";

const PUBLIC_ALTERNATE_KEY: &str = "public";
const PUBLIC_ALTERNATE_TITLE: &str = "Public Access";
const SYNTHESIZED_STAC_VERSION: &str = "1.0.0";
const DEFAULT_LICENSE: &str = "other";

#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
    /// The collection has no item with both a bbox and a datetime, so no
    /// extent can be derived.
    #[error("Cannot derive extent for collection '{0}': no item carried a bbox and datetime")]
    EmptyExtent(String),
}

/// Output toggles chosen on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Rewrite asset hrefs to storage-native URLs.
    pub with_s3_urls: bool,
    /// Attach the aggregated `item_assets` to collections.
    pub with_assets_extension: bool,
}

/// `"LINZ_" + "a-b"` → `"LINZ_a_b"` (or `"LINZ_a-b"` without hyphen replacement).
pub fn rebrand_collection_id(original_id: &str, prefix: &str, replace_hyphens: bool) -> String {
    let body = if replace_hyphens {
        original_id.replace('-', "_")
    } else {
        original_id.to_string()
    };
    format!("{}{}", prefix, body)
}

/// Resolves relative asset hrefs against the URL the item was fetched from.
/// Hrefs that are already absolute, or that cannot be resolved, are kept.
pub fn make_asset_hrefs_absolute(item: &mut Item, item_url: &str) {
    let Ok(base) = Url::parse(item_url) else {
        return;
    };

    for asset in item.assets.values_mut() {
        if Url::parse(&asset.href).is_ok() {
            continue;
        }
        if let Ok(resolved) = base.join(&asset.href) {
            asset.href = resolved.to_string();
        }
    }
}

/// Maps a fetched item to its provider-branded record.
pub fn transform_item(
    mut item: Item,
    item_url: &str,
    collection_id: &str,
    profile: &ProviderProfile,
    options: &TransformOptions,
) -> Item {
    make_asset_hrefs_absolute(&mut item, item_url);

    item.links.clear();
    item.id = item.id.replace('/', "_");
    item.collection = Some(collection_id.to_string());

    item.assets
        .retain(|_, asset| !profile.is_excluded_asset(&asset.href, asset.media_type.as_deref()));

    if options.with_s3_urls {
        if profile.alternate_assets {
            declare_extension(&mut item.stac_extensions, ALTERNATE_ASSETS_EXTENSION);
        }
        for asset in item.assets.values_mut() {
            rewrite_asset_href(asset, profile);
        }
    }

    item.properties
        .retain(|key, _| !profile.is_stripped_property(key));

    item
}

fn rewrite_asset_href(asset: &mut Asset, profile: &ProviderProfile) {
    let public = if profile.upgrade_http {
        asset.href.replace("http://", "https://")
    } else {
        asset.href.clone()
    };

    asset.href = profile
        .url_rewrites
        .iter()
        .fold(public.clone(), |href, rewrite| href.replace(&rewrite.from, &rewrite.to));

    if profile.alternate_assets {
        asset.alternate.get_or_insert_with(BTreeMap::new).insert(
            PUBLIC_ALTERNATE_KEY.to_string(),
            AlternateHref {
                title: Some(PUBLIC_ALTERNATE_TITLE.to_string()),
                href: public,
                extra: Map::new(),
            },
        );
    }
}

/// Records every asset name not yet in `summary`. The first item to mention
/// an asset name decides its entry.
pub fn aggregate_asset_summary(summary: &mut AssetSummary, item_assets: &BTreeMap<String, Asset>) {
    for (name, asset) in item_assets {
        summary.entry(name.clone()).or_insert_with(|| AssetTemplate {
            media_type: Some(
                asset
                    .media_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            title: Some(asset.title.clone().unwrap_or_else(|| name.clone())),
            roles: Some(
                asset
                    .roles
                    .clone()
                    .unwrap_or_else(|| vec!["data".to_string()]),
            ),
            extra: Map::new(),
        });
    }
}

/// Running spatial and temporal extent of a collection's items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtentAccumulator {
    bbox: Option<[f64; 4]>,
    interval: Option<(String, String)>,
}

impl ExtentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one item in. Items without a bbox or datetime only contribute
    /// what they have.
    pub fn add_item(&mut self, item: &Item) {
        if let Some(bbox) = item.bbox.as_deref() {
            self.add_bbox(bbox);
        }
        if let Some((start, end)) = item.time_range() {
            self.add_interval(start, end);
        }
    }

    /// Accepts 2D (`[minx, miny, maxx, maxy]`) and 3D
    /// (`[minx, miny, minz, maxx, maxy, maxz]`) boxes; other lengths are ignored.
    pub fn add_bbox(&mut self, bbox: &[f64]) {
        let [min_x, min_y, max_x, max_y] = match bbox.len() {
            4 => [bbox[0], bbox[1], bbox[2], bbox[3]],
            6 => [bbox[0], bbox[1], bbox[3], bbox[4]],
            _ => return,
        };

        self.bbox = Some(match self.bbox {
            None => [min_x, min_y, max_x, max_y],
            Some([a, b, c, d]) => [a.min(min_x), b.min(min_y), c.max(max_x), d.max(max_y)],
        });
    }

    /// ISO-8601 UTC timestamps are fixed-width, so string order is time order.
    pub fn add_interval(&mut self, start: &str, end: &str) {
        self.interval = Some(match self.interval.take() {
            None => (start.to_string(), end.to_string()),
            Some((lo, hi)) => (
                if start < lo.as_str() { start.to_string() } else { lo },
                if end > hi.as_str() { end.to_string() } else { hi },
            ),
        });
    }

    pub fn bbox(&self) -> Option<[f64; 4]> {
        self.bbox
    }

    pub fn interval(&self) -> Option<(&str, &str)> {
        self.interval
            .as_ref()
            .map(|(start, end)| (start.as_str(), end.as_str()))
    }

    /// `None` until at least one bbox and one datetime have been seen.
    pub fn to_extent(&self) -> Option<Extent> {
        let bbox = self.bbox?;
        let (start, end) = self.interval.clone()?;
        Some(Extent {
            spatial: SpatialExtent {
                bbox: vec![bbox.to_vec()],
                extra: Map::new(),
            },
            temporal: TemporalExtent {
                interval: vec![vec![Some(start), Some(end)]],
                extra: Map::new(),
            },
            extra: Map::new(),
        })
    }
}

/// Brands a source collection once all of its items have been processed.
pub fn finalize_collection(
    mut collection: Collection,
    collection_id: &str,
    summary: &AssetSummary,
    extent: &ExtentAccumulator,
    profile: &ProviderProfile,
    options: &TransformOptions,
) -> Result<Collection, TransformError> {
    let source_id = std::mem::replace(&mut collection.id, collection_id.to_string());
    collection.links.clear();
    collection.description = profile.describe(&source_id, &collection.description);

    if profile.derive_extent {
        collection.extent = Some(
            extent
                .to_extent()
                .ok_or_else(|| TransformError::EmptyExtent(collection_id.to_string()))?,
        );
    }

    if let Some(bbox) = profile.fixed_bbox {
        apply_fixed_bbox(&mut collection, bbox);
    }

    if let Some(existing) = collection.item_assets.as_mut() {
        existing.retain(|_, template| {
            !template
                .media_type
                .as_deref()
                .is_some_and(|media_type| profile.is_excluded_asset("", Some(media_type)))
        });
    }

    if options.with_assets_extension {
        declare_extension(&mut collection.stac_extensions, ITEM_ASSETS_EXTENSION);
        collection.item_assets = Some(summary.clone());
    }

    Ok(collection)
}

/// Builds a collection for a bare catalog node from what its items showed.
pub fn synthesize_collection(
    node: &CatalogNode,
    collection_id: &str,
    summary: &AssetSummary,
    extent: &ExtentAccumulator,
    profile: &ProviderProfile,
    options: &TransformOptions,
) -> Result<Collection, TransformError> {
    let extent = extent
        .to_extent()
        .ok_or_else(|| TransformError::EmptyExtent(collection_id.to_string()))?;
    let description = profile.describe(&node.id, "");

    let mut extra = Map::new();
    extra.insert("type".to_string(), Value::from("Collection"));
    extra.insert(
        "stac_version".to_string(),
        Value::from(SYNTHESIZED_STAC_VERSION),
    );
    extra.insert("title".to_string(), Value::from(description.clone()));
    extra.insert(
        "license".to_string(),
        Value::from(profile.license.as_deref().unwrap_or(DEFAULT_LICENSE)),
    );

    let mut collection = Collection {
        id: collection_id.to_string(),
        description,
        links: Vec::new(),
        extent: Some(extent),
        stac_extensions: None,
        item_assets: None,
        extra,
    };

    if let Some(bbox) = profile.fixed_bbox {
        apply_fixed_bbox(&mut collection, bbox);
    }

    if options.with_assets_extension {
        declare_extension(&mut collection.stac_extensions, ITEM_ASSETS_EXTENSION);
        collection.item_assets = Some(summary.clone());
    }

    Ok(collection)
}

/// Builds a collection with no source document: the ID doubles as the title
/// and the template supplies description, license and any extra fields.
pub fn collection_from_template(
    collection_id: &str,
    template: &CollectionTemplate,
    summary: &AssetSummary,
    extent: &ExtentAccumulator,
    profile: &ProviderProfile,
    attach_item_assets: bool,
) -> Result<Collection, TransformError> {
    let extent = extent
        .to_extent()
        .ok_or_else(|| TransformError::EmptyExtent(collection_id.to_string()))?;

    let mut extra = template.extra.clone();
    extra.insert("type".to_string(), Value::from("Collection"));
    extra.insert(
        "stac_version".to_string(),
        Value::from(SYNTHESIZED_STAC_VERSION),
    );
    extra.insert("title".to_string(), Value::from(collection_id));
    let license = template
        .license
        .as_deref()
        .or(profile.license.as_deref())
        .unwrap_or(DEFAULT_LICENSE);
    extra.insert("license".to_string(), Value::from(license));

    let mut collection = Collection {
        id: collection_id.to_string(),
        description: template
            .description
            .clone()
            .unwrap_or_else(|| profile.describe(collection_id, "")),
        links: Vec::new(),
        extent: Some(extent),
        stac_extensions: None,
        item_assets: None,
        extra,
    };

    for uri in &template.stac_extensions {
        declare_extension(&mut collection.stac_extensions, uri);
    }

    if let Some(bbox) = profile.fixed_bbox {
        apply_fixed_bbox(&mut collection, bbox);
    }

    if attach_item_assets {
        declare_extension(&mut collection.stac_extensions, ITEM_ASSETS_EXTENSION);
        collection.item_assets = Some(summary.clone());
    }

    Ok(collection)
}

fn apply_fixed_bbox(collection: &mut Collection, bbox: [f64; 4]) {
    match collection.extent.as_mut() {
        Some(extent) => extent.spatial.bbox = vec![bbox.to_vec()],
        None => {
            collection.extent = Some(Extent {
                spatial: SpatialExtent {
                    bbox: vec![bbox.to_vec()],
                    extra: Map::new(),
                },
                temporal: TemporalExtent {
                    interval: vec![vec![None, None]],
                    extra: Map::new(),
                },
                extra: Map::new(),
            })
        }
    }
}
