//! RangeFeed: a JSON inventory API.
//!
//! The reference JSON adapter. The endpoint returns a typed payload, so
//! extraction is a serde parse plus field mapping — the interesting part
//! is keeping the failure taxonomy honest when the payload drifts.

use serde::Deserialize;
use url::Url;

use crate::plugin::{ExtractFailure, ExtractFailureKind, PluginManifest, PluginMode, SitePlugin};
use crate::policy::RateLimitOverride;
use crate::types::{RawOffer, RawPrice};

pub struct RangeFeed {
    manifest: PluginManifest,
}

/// Inventory ids arrive as numbers or strings depending on API version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdField {
    Number(i64),
    Text(String),
}

impl IdField {
    fn into_string(self) -> String {
        match self {
            IdField::Number(n) => n.to_string(),
            IdField::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InventoryItem {
    id: Option<IdField>,
    #[serde(alias = "title")]
    name: Option<String>,
    sku: Option<String>,
    price: Option<RawPrice>,
    #[serde(alias = "availability", alias = "stock_status")]
    stock: Option<String>,
    upc: Option<String>,
    brand: Option<String>,
    caliber: Option<String>,
    #[serde(alias = "grains")]
    grain_weight: Option<String>,
    #[serde(alias = "rounds")]
    round_count: Option<String>,
    currency: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryResponse {
    products: Vec<InventoryItem>,
}

impl RangeFeed {
    pub fn new() -> Self {
        let base_urls = ["https://api.rangefeed.io"]
            .iter()
            .filter_map(|raw| Url::parse(raw).ok())
            .collect();
        RangeFeed {
            manifest: PluginManifest {
                id: "rangefeed".to_string(),
                name: "RangeFeed".to_string(),
                version: "2.1.0".to_string(),
                mode: PluginMode::Json,
                base_urls,
                rate_limit: Some(RateLimitOverride {
                    requests_per_second: Some(1.0),
                    min_delay_ms: Some(500),
                    max_concurrent: Some(1),
                }),
            },
        }
    }
}

impl Default for RangeFeed {
    fn default() -> Self {
        RangeFeed::new()
    }
}

impl SitePlugin for RangeFeed {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    fn extract_raw(&self, body: &str, url: &str) -> Result<Vec<RawOffer>, ExtractFailure> {
        if body.trim().is_empty() {
            return Err(ExtractFailure::new(
                ExtractFailureKind::EmptyPage,
                "response body is empty",
            ));
        }

        let response: InventoryResponse = serde_json::from_str(body).map_err(|err| {
            ExtractFailure::new(
                ExtractFailureKind::PageStructureChanged,
                format!("inventory payload no longer parses: {err}"),
            )
        })?;

        // an empty inventory is a real answer, not a failure
        let offers = response
            .products
            .into_iter()
            .map(|item| RawOffer {
                url: item.url.unwrap_or_else(|| url.to_string()),
                title: item.name,
                price: item.price,
                availability: item.stock,
                product_id: item.id.map(IdField::into_string),
                sku: item.sku,
                upc: item.upc,
                brand: item.brand,
                caliber: item.caliber,
                grain_weight: item.grain_weight,
                round_count: item.round_count,
                currency: item.currency,
                shipping: None,
            })
            .collect();
        Ok(offers)
    }
}
