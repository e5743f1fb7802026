//! Raw offer to canonical offer.
//!
//! Parsing here is deliberately tolerant — sites render prices and counts
//! with currency symbols, thousands separators, and unit suffixes — but
//! never inventive: a value that does not parse stays `None` and the
//! validation step decides what that absence means. Nothing in this module
//! fabricates a price or an availability.

use crate::identity::IdentityKey;
use crate::run::RunContext;
use crate::types::{Availability, NormalizedOffer, RawOffer, RawPrice};
use crate::urlnorm::canonicalize_url;
use crate::validate::{Disposition, validate_offer};

/// A normalized offer plus the verdict on it.
#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub offer: NormalizedOffer,
    pub disposition: Disposition,
}

const OUT_OF_STOCK_MARKERS: &[&str] = &[
    "out of stock",
    "out-of-stock",
    "outofstock",
    "sold out",
    "soldout",
    "unavailable",
    "discontinued",
];

const IN_STOCK_MARKERS: &[&str] =
    &["in stock", "in-stock", "instock", "available", "add to cart", "buy now"];

const BACKORDER_MARKERS: &[&str] =
    &["backorder", "back-order", "back order", "preorder", "pre-order", "pre order"];

/// Buckets a scraped availability string. Matches are substring-based on
/// the lowercased text, so schema.org URLs (`.../OutOfStock`) classify the
/// same as display text. Backorder and out-of-stock are checked before
/// in-stock because "unavailable" contains no usable in-stock signal yet
/// shares letters with "available".
pub fn classify_availability(raw: Option<&str>) -> Availability {
    let Some(raw) = raw else {
        return Availability::Unknown;
    };
    let lowered = raw.to_lowercase();
    if BACKORDER_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Availability::Backorder;
    }
    if OUT_OF_STOCK_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Availability::OutOfStock;
    }
    if IN_STOCK_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Availability::InStock;
    }
    Availability::Unknown
}

/// Converts a scraped price into integer cents. `"$1,299.99"` -> `129999`.
/// Zero, negative, and unparsable prices are `None`, never `0`.
pub fn parse_price_cents(price: &RawPrice) -> Option<i64> {
    match price {
        RawPrice::Number(value) => to_cents(*value),
        RawPrice::Text(text) => {
            let cleaned: String = text
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            to_cents(cleaned.parse::<f64>().ok()?)
        }
    }
}

fn to_cents(value: f64) -> Option<i64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Some((value * 100.0).round() as i64)
}

/// Parses a positive integer out of text with unit suffixes and thousands
/// separators: `"115gr"` -> `115`, `"1,000 rds"` -> `1000`.
pub fn parse_positive_int(raw: &str) -> Option<u32> {
    let cleaned = raw.replace(',', "");
    let digits: String = cleaned
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.parse::<u32>() {
        Ok(value) if value > 0 => Some(value),
        _ => None,
    }
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Produces the canonical offer for one raw offer and runs validation on
/// it. The observation timestamp always comes from the run context, so
/// retries of the same run cannot produce spuriously distinct records.
pub fn normalize_offer(raw: &RawOffer, ctx: &RunContext) -> NormalizeOutcome {
    let (url, identity_key) = match canonicalize_url(&raw.url) {
        Ok(canonical) => {
            let key = IdentityKey::generate(
                raw.product_id.as_deref(),
                raw.sku.as_deref(),
                &canonical,
            );
            (canonical.to_string(), Some(key))
        }
        // no canonical URL to hash: identity only if the retailer's own
        // identifiers provide one
        Err(_) => (
            raw.url.trim().to_string(),
            IdentityKey::from_retailer_ids(raw.product_id.as_deref(), raw.sku.as_deref()),
        ),
    };

    let price_cents = raw.price.as_ref().and_then(parse_price_cents);
    let shipping_cents = raw.shipping.as_ref().and_then(parse_price_cents);
    let round_count = raw.round_count.as_deref().and_then(parse_positive_int);
    let grain_weight = raw.grain_weight.as_deref().and_then(parse_positive_int);

    let cost_per_round_cents = match (price_cents, round_count) {
        (Some(price), Some(rounds)) => {
            Some((price as f64 / rounds as f64).round() as i64)
        }
        _ => None,
    };

    let offer = NormalizedOffer {
        source_id: ctx.source_id.clone(),
        retailer_id: ctx.retailer_id.clone(),
        url,
        title: non_blank(raw.title.as_deref()),
        price_cents,
        // All supported retailers price in USD; a missing currency is
        // assumed, not dropped.
        currency: non_blank(raw.currency.as_deref()).unwrap_or_else(|| "USD".to_string()),
        availability: classify_availability(raw.availability.as_deref()),
        observed_at: ctx.run_observed_at,
        identity_key,
        adapter_version: non_blank(Some(&ctx.adapter_version)),
        product_id: non_blank(raw.product_id.as_deref()),
        sku: non_blank(raw.sku.as_deref()),
        upc: non_blank(raw.upc.as_deref()),
        brand: non_blank(raw.brand.as_deref()),
        caliber: non_blank(raw.caliber.as_deref()),
        grain_weight,
        round_count,
        shipping_cents,
        cost_per_round_cents,
    };

    let disposition = validate_offer(&offer);
    NormalizeOutcome { offer, disposition }
}
