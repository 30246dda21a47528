//! Declarative provider profiles.
//!
//! A [`ProviderProfile`] records everything that differs between providers:
//! where the catalog lives, how IDs and descriptions are branded, which URL
//! prefixes map to storage-native locations, and which assets or properties
//! are dropped. The pipeline itself has no provider-specific code paths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::harvest::providers;
use crate::harvest::transform::rebrand_collection_id;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Unknown provider '{0}' (expected one of: {known})", known = providers::BUILTIN_NAMES.join(", "))]
    UnknownProvider(String),

    #[error("Failed to read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid profile '{name}': {message}")]
    Invalid { name: String, message: String },
}

/// How collections and their items are discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogLayout {
    /// Walk `child`/`item` links from the root catalog.
    #[default]
    Links,

    /// Take one upstream collection and query its items from a STAC API
    /// search endpoint.
    Search {
        upstream_collection: String,
        collection_url: String,
        search_url: String,
        query: Value,
    },

    /// Fetch the item URLs listed one per line in `list_path` into a single
    /// collection built from [`ProviderProfile::collection_template`].
    ItemList { list_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionIdRule {
    /// `prefix + original`, optionally with hyphens turned into underscores.
    Prefixed {
        prefix: String,
        #[serde(default)]
        replace_hyphens: bool,
    },
    /// Every harvested collection gets this ID.
    Fixed { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DescriptionStyle {
    /// `"<label> | <original description>"`
    Prefix { label: String },
    /// Replace the description outright.
    Replace { text: String },
    /// `"<label> for <source id>"`, also used as the title of synthesized
    /// collections.
    For { label: String },
}

/// Fixed fields of a collection that has no source document and is built
/// from its items alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionTemplate {
    /// Falls back to the profile's description style when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stac_extensions: Vec<String>,
    /// Copied onto the collection as-is (e.g. `renders`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRewrite {
    pub from: String,
    pub to: String,
}

impl UrlRewrite {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub name: String,
    pub root_url: String,
    #[serde(default)]
    pub layout: CatalogLayout,
    pub collection_id: CollectionIdRule,
    pub description: DescriptionStyle,

    /// Public HTTPS prefix → storage-native prefix, applied in order.
    #[serde(default)]
    pub url_rewrites: Vec<UrlRewrite>,

    /// Upgrade `http://` asset hrefs to `https://` before rewriting.
    #[serde(default)]
    pub upgrade_http: bool,

    /// Record the public href under `alternate.public` when rewriting.
    #[serde(default = "default_true")]
    pub alternate_assets: bool,

    #[serde(default)]
    pub strip_property_prefixes: Vec<String>,

    /// Assets whose href or media type contains any of these are dropped.
    #[serde(default)]
    pub exclude_asset_patterns: Vec<String>,

    /// Replace the collection extent with the one aggregated from its items.
    #[serde(default)]
    pub derive_extent: bool,

    #[serde(default)]
    pub fixed_bbox: Option<[f64; 4]>,

    /// License of synthesized collections.
    #[serde(default)]
    pub license: Option<String>,

    /// Used for collections built from an item list or an items file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_template: Option<CollectionTemplate>,
}

fn default_true() -> bool {
    true
}

impl ProviderProfile {
    /// Looks up a built-in profile by name.
    pub fn builtin(name: &str) -> Result<Self, ProfileError> {
        providers::builtin(name).ok_or_else(|| ProfileError::UnknownProvider(name.to_string()))
    }

    /// Loads and validates a profile from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let profile: Self = serde_json::from_str(&content).map_err(|source| ProfileError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        profile.validate()?;
        Ok(profile)
    }

    /// Points the profile at another root. Search endpoints under the old
    /// root move with it.
    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        let root_url = root_url.into();
        if let CatalogLayout::Search {
            collection_url,
            search_url,
            ..
        } = &mut self.layout
        {
            for url in [collection_url, search_url] {
                if let Some(rest) = url.strip_prefix(self.root_url.as_str()) {
                    let rebased = format!("{}{}", root_url, rest);
                    *url = rebased;
                }
            }
        }
        self.root_url = root_url;
        self
    }

    /// Harvests the items listed in `list_path` into the single collection
    /// `collection_id`.
    pub fn with_item_list(mut self, list_path: impl Into<PathBuf>, collection_id: &str) -> Self {
        self.layout = CatalogLayout::ItemList {
            list_path: list_path.into(),
        };
        self.collection_id = CollectionIdRule::Fixed {
            id: collection_id.to_string(),
        };
        self
    }

    /// Template for collections without a source document.
    pub fn template(&self) -> CollectionTemplate {
        self.collection_template.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |message: String| ProfileError::Invalid {
            name: self.name.clone(),
            message,
        };

        if !matches!(self.layout, CatalogLayout::ItemList { .. }) {
            url::Url::parse(&self.root_url)
                .map_err(|e| invalid(format!("root_url '{}': {}", self.root_url, e)))?;
        }

        if let CatalogLayout::Search {
            collection_url,
            search_url,
            ..
        } = &self.layout
        {
            for candidate in [collection_url, search_url] {
                url::Url::parse(candidate)
                    .map_err(|e| invalid(format!("'{}': {}", candidate, e)))?;
            }
        }

        if matches!(self.layout, CatalogLayout::ItemList { .. })
            && !matches!(self.collection_id, CollectionIdRule::Fixed { .. })
        {
            return Err(invalid("item_list layout needs a fixed collection_id".to_string()));
        }

        if let Some([min_x, min_y, max_x, max_y]) = self.fixed_bbox {
            if min_x > max_x || min_y > max_y {
                return Err(invalid("fixed_bbox minimum exceeds maximum".to_string()));
            }
        }

        if self.url_rewrites.iter().any(|rewrite| rewrite.from.is_empty()) {
            return Err(invalid("url_rewrites entry with empty 'from'".to_string()));
        }

        Ok(())
    }

    /// Provider-branded ID for a source collection.
    pub fn collection_id_for(&self, original_id: &str) -> String {
        match &self.collection_id {
            CollectionIdRule::Prefixed {
                prefix,
                replace_hyphens,
            } => rebrand_collection_id(original_id, prefix, *replace_hyphens),
            CollectionIdRule::Fixed { id } => id.clone(),
        }
    }

    /// Branded description for a collection whose source is `source_id`.
    pub fn describe(&self, source_id: &str, original: &str) -> String {
        match &self.description {
            DescriptionStyle::Prefix { label } => format!("{} | {}", label, original),
            DescriptionStyle::Replace { text } => text.clone(),
            DescriptionStyle::For { label } => format!("{} for {}", label, source_id),
        }
    }

    pub fn is_excluded_asset(&self, href: &str, media_type: Option<&str>) -> bool {
        self.exclude_asset_patterns.iter().any(|pattern| {
            href.contains(pattern.as_str())
                || media_type.is_some_and(|media_type| media_type.contains(pattern.as_str()))
        })
    }

    pub fn is_stripped_property(&self, key: &str) -> bool {
        self.strip_property_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }
}
