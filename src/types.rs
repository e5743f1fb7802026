//! Offer data model shared across the pipeline.
//!
//! [`RawOffer`] is whatever a site adapter could scrape, with no correctness
//! guarantees. [`NormalizedOffer`] is the canonical record handed to the
//! persistence boundary; it is produced once by normalization and not
//! mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;

/// A price as a site presented it: either free text (`"$14.99"`) or a bare
/// number from a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPrice {
    Text(String),
    Number(f64),
}

/// Untyped, site-local offer produced by an adapter's extraction step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawOffer {
    /// Absolute URL of the listing this offer came from.
    pub url: String,
    pub title: Option<String>,
    pub price: Option<RawPrice>,
    /// Free-text availability as scraped, e.g. `"In Stock"` or a
    /// schema.org availability URL.
    pub availability: Option<String>,
    pub product_id: Option<String>,
    pub sku: Option<String>,
    pub upc: Option<String>,
    pub brand: Option<String>,
    pub caliber: Option<String>,
    /// Raw grain weight, unit suffix tolerated (`"115gr"`).
    pub grain_weight: Option<String>,
    /// Raw round count, unit suffix tolerated (`"50 rounds"`).
    pub round_count: Option<String>,
    pub currency: Option<String>,
    pub shipping: Option<RawPrice>,
}

/// Canonical availability buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    InStock,
    OutOfStock,
    Backorder,
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "IN_STOCK",
            Availability::OutOfStock => "OUT_OF_STOCK",
            Availability::Backorder => "BACKORDER",
            Availability::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical offer record consumed by the persistence boundary.
///
/// Fields that validation requires are kept optional here so that a failed
/// parse is preserved as an absence and reported with a specific reason,
/// instead of being silently defaulted during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedOffer {
    pub source_id: String,
    pub retailer_id: String,
    /// Canonical listing URL.
    pub url: String,
    pub title: Option<String>,
    /// Integer cents; `None` when the raw price was absent, non-positive,
    /// or unparsable.
    pub price_cents: Option<i64>,
    pub currency: String,
    pub availability: Availability,
    /// The run's fixed observation timestamp, never per-attempt wall clock.
    pub observed_at: DateTime<Utc>,
    pub identity_key: Option<IdentityKey>,
    pub adapter_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caliber: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grain_weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_round_cents: Option<i64>,
}
