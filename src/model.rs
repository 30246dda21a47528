//! STAC document shapes used by the harvester.
//!
//! Only the fields the pipeline reads or rewrites are typed. Everything else
//! is carried through `extra` so that records round-trip without losing
//! provider-specific metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Link relation pointing at a sub-catalog or sub-collection.
pub const REL_CHILD: &str = "child";

/// Link relation pointing at an item document.
pub const REL_ITEM: &str = "item";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any node of a catalog tree (catalog, collection) as seen during traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogNode {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub id: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogNode {
    pub fn child_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|link| link.rel == REL_CHILD)
    }

    pub fn item_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|link| link.rel == REL_ITEM)
    }

    /// A node with no child links is a leaf; only leaves contribute items.
    pub fn is_leaf(&self) -> bool {
        self.child_links().next().is_none()
    }

    /// Bare catalogs carry no extent, so the harvester has to synthesize a
    /// collection for them.
    pub fn is_collection(&self) -> bool {
        self.node_type.as_deref() == Some("Collection")
    }
}

/// Secondary location for the same asset content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternateHref {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub href: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate: Option<BTreeMap<String, AlternateHref>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// STAC Item (GeoJSON Feature).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub links: Vec<Link>,
    pub assets: BTreeMap<String, Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stac_extensions: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    /// `datetime`, or the `start_datetime`/`end_datetime` pair when both are set.
    pub fn time_range(&self) -> Option<(&str, &str)> {
        let start = self.properties.get("start_datetime").and_then(Value::as_str);
        let end = self.properties.get("end_datetime").and_then(Value::as_str);
        match (start, end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => self
                .properties
                .get("datetime")
                .and_then(Value::as_str)
                .map(|dt| (dt, dt)),
        }
    }
}

/// Per-collection description of the assets its items carry
/// (`item_assets` entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetTemplate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Asset name → template, ordered by name.
pub type AssetSummary = BTreeMap<String, AssetTemplate>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialExtent {
    pub bbox: Vec<Vec<f64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalExtent {
    pub interval: Vec<Vec<Option<String>>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub spatial: SpatialExtent,
    pub temporal: TemporalExtent,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// STAC Collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<Extent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stac_extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_assets: Option<AssetSummary>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Appends `uri` to an optional extension list, creating the list if absent.
pub(crate) fn declare_extension(extensions: &mut Option<Vec<String>>, uri: &str) {
    let list = extensions.get_or_insert_with(Vec::new);
    if !list.iter().any(|existing| existing == uri) {
        list.push(uri.to_string());
    }
}
