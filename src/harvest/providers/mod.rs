//! Built-in provider profiles.
//!
//! - `linz` - LINZ aerial imagery, flat collections with relative asset hrefs
//! - `maxar` - Maxar Open Data events, one sub-collection level per event
//! - `umbra` - Umbra SAR, bare catalogs nested by year/month/day
//! - `sentinel-2-iceland` - one Sentinel-2 L2A subset queried from Earth Search

use serde_json::json;

use crate::harvest::profile::{
    CatalogLayout, CollectionIdRule, CollectionTemplate, DescriptionStyle, ProviderProfile,
    UrlRewrite,
};

const RENDER_EXTENSION: &str = "https://stac-extensions.github.io/render/v1.0.0/schema.json";

pub const BUILTIN_NAMES: [&str; 4] = ["linz", "maxar", "umbra", "sentinel-2-iceland"];

pub fn builtin(name: &str) -> Option<ProviderProfile> {
    match name {
        "linz" => Some(linz()),
        "maxar" => Some(maxar()),
        "umbra" => Some(umbra()),
        "sentinel-2-iceland" => Some(sentinel_2_iceland()),
        _ => None,
    }
}

fn prefixed(prefix: &str, replace_hyphens: bool) -> CollectionIdRule {
    CollectionIdRule::Prefixed {
        prefix: prefix.to_string(),
        replace_hyphens,
    }
}

pub fn linz() -> ProviderProfile {
    ProviderProfile {
        name: "linz".to_string(),
        root_url: "https://nz-imagery.s3-ap-southeast-2.amazonaws.com/catalog.json".to_string(),
        layout: CatalogLayout::Links,
        collection_id: prefixed("LINZ_", true),
        description: DescriptionStyle::Prefix {
            label: "LINZ OpenData".to_string(),
        },
        url_rewrites: vec![UrlRewrite::new(
            "https://nz-imagery.s3-ap-southeast-2.amazonaws.com",
            "s3://nz-imagery",
        )],
        upgrade_http: false,
        alternate_assets: true,
        strip_property_prefixes: Vec::new(),
        exclude_asset_patterns: Vec::new(),
        derive_extent: false,
        fixed_bbox: None,
        license: None,
        collection_template: None,
    }
}

pub fn maxar() -> ProviderProfile {
    ProviderProfile {
        name: "maxar".to_string(),
        root_url: "https://maxar-opendata.s3.amazonaws.com/events/catalog.json".to_string(),
        layout: CatalogLayout::Links,
        collection_id: prefixed("MAXAR_", true),
        description: DescriptionStyle::Prefix {
            label: "Maxar OpenData".to_string(),
        },
        url_rewrites: vec![UrlRewrite::new(
            "https://maxar-opendata.s3.amazonaws.com",
            "s3://maxar-opendata",
        )],
        upgrade_http: false,
        alternate_assets: true,
        strip_property_prefixes: Vec::new(),
        exclude_asset_patterns: Vec::new(),
        derive_extent: false,
        fixed_bbox: None,
        license: None,
        collection_template: Some(maxar_template()),
    }
}

/// Event collections assembled from item lists get a visual render preset.
fn maxar_template() -> CollectionTemplate {
    let mut extra = serde_json::Map::new();
    extra.insert(
        "renders".to_string(),
        json!({
            "visual": {
                "title": "Visual Image",
                "assets": ["visual"],
                "asset_bidx": "visual|1,2,3",
                "minmax_zoom": [8, 22]
            }
        }),
    );
    CollectionTemplate {
        description: Some("Maxar OpenData".to_string()),
        license: Some("CC-BY-NC-4.0".to_string()),
        stac_extensions: vec![RENDER_EXTENSION.to_string()],
        extra,
    }
}

pub fn umbra() -> ProviderProfile {
    ProviderProfile {
        name: "umbra".to_string(),
        root_url: "https://s3.us-west-2.amazonaws.com/umbra-open-data-catalog/stac/catalog.json"
            .to_string(),
        layout: CatalogLayout::Links,
        collection_id: prefixed("UMBRA_", false),
        description: DescriptionStyle::For {
            label: "UMBRA OpenData".to_string(),
        },
        url_rewrites: vec![UrlRewrite::new(
            "https://umbra-open-data-catalog.s3.amazonaws.com",
            "s3://umbra-open-data-catalog",
        )],
        upgrade_http: true,
        alternate_assets: true,
        strip_property_prefixes: Vec::new(),
        exclude_asset_patterns: Vec::new(),
        derive_extent: true,
        fixed_bbox: None,
        license: Some("CC-BY-4.0".to_string()),
        collection_template: None,
    }
}

pub fn sentinel_2_iceland() -> ProviderProfile {
    ProviderProfile {
        name: "sentinel-2-iceland".to_string(),
        root_url: "https://earth-search.aws.element84.com/v1/".to_string(),
        layout: CatalogLayout::Search {
            upstream_collection: "sentinel-2-l2a".to_string(),
            collection_url: "https://earth-search.aws.element84.com/v1/collections/sentinel-2-l2a"
                .to_string(),
            search_url: "https://earth-search.aws.element84.com/v1/search".to_string(),
            query: json!({
                "collections": ["sentinel-2-l2a"],
                "bbox": [-24.95, 63.38, -13.99, 66.56],
                "datetime": "2023-01-01T00:00:00Z/2023-12-31T23:59:59Z",
                "limit": 500,
                "query": {"eo:cloud_cover": {"lt": 5}}
            }),
        },
        collection_id: CollectionIdRule::Fixed {
            id: "sentinel-2-iceland".to_string(),
        },
        description: DescriptionStyle::Replace {
            text: "Sentinel-2 L2A images over Iceland".to_string(),
        },
        url_rewrites: vec![UrlRewrite::new(
            "https://sentinel-cogs.s3.us-west-2.amazonaws.com/sentinel-s2-l2a-cogs",
            "s3://sentinel-cogs/sentinel-s2-l2a-cogs",
        )],
        upgrade_http: false,
        alternate_assets: false,
        strip_property_prefixes: vec!["s2:".to_string(), "earthsearch:".to_string()],
        exclude_asset_patterns: vec!["jp2".to_string()],
        derive_extent: false,
        fixed_bbox: Some([-24.95, 63.38, -13.99, 66.56]),
        license: None,
        collection_template: None,
    }
}
