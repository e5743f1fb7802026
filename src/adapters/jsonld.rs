//! Shared schema.org JSON-LD scanning for HTML adapters.
//!
//! Retail product pages usually embed a `Product` node in one or more
//! `<script type="application/ld+json">` blocks. Sites nest it in every
//! shape JSON-LD permits: a bare object, a top-level array, or an
//! `@graph` bundle; `@type` as a string or an array; `offers` as one
//! object or a list. These helpers flatten all of that so per-site
//! adapters only map fields.

use scraper::{Html, Selector};
use serde_json::Value;

use crate::types::{RawOffer, RawPrice};

/// Parsed `ld+json` blocks from one page.
#[derive(Debug, Default)]
pub struct LdJsonScan {
    /// Blocks that parsed as JSON, in document order.
    pub blocks: Vec<Value>,
    /// Script tags seen, including ones that failed to parse.
    pub script_count: usize,
}

/// Collects every `application/ld+json` block. Unparsable blocks are
/// counted but skipped; sites ship broken JSON next to good JSON.
pub fn scan_ld_json(body: &str) -> LdJsonScan {
    let document = Html::parse_document(body);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();

    let mut scan = LdJsonScan::default();
    for script in document.select(&selector) {
        scan.script_count += 1;
        let text: String = script.text().collect();
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            scan.blocks.push(value);
        }
    }
    scan
}

/// Every schema.org `Product` node across the scanned blocks.
pub fn product_nodes(scan: &LdJsonScan) -> Vec<&Value> {
    let mut products = Vec::new();
    for block in &scan.blocks {
        collect_products(block, &mut products);
    }
    products
}

fn collect_products<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if type_matches(value, "Product") {
                out.push(value);
            }
            if let Some(Value::Array(graph)) = map.get("@graph") {
                for node in graph {
                    collect_products(node, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_products(item, out);
            }
        }
        _ => {}
    }
}

/// Whether a node's `@type` names the given schema.org type, accepting
/// both string and array forms.
pub fn type_matches(node: &Value, type_name: &str) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case(type_name),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| t.eq_ignore_ascii_case(type_name)),
        _ => false,
    }
}

/// The offer nodes of a product: `offers` as a single object, an array,
/// or an `AggregateOffer` wrapping an `offers` array.
pub fn offers_of(product: &Value) -> Vec<&Value> {
    let Some(offers) = product.get("offers") else {
        return Vec::new();
    };
    match offers {
        Value::Object(map) => {
            if type_matches(offers, "AggregateOffer") {
                match map.get("offers") {
                    Some(Value::Array(inner)) => inner.iter().collect(),
                    // aggregate with no itemized offers: use the envelope,
                    // it often carries lowPrice/price itself
                    _ => vec![offers],
                }
            } else {
                vec![offers]
            }
        }
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    }
}

/// Maps one product/offer pair onto a raw offer for the page at `url`.
pub fn raw_offer_from_product(product: &Value, offer: &Value, url: &str) -> RawOffer {
    RawOffer {
        url: url.to_string(),
        title: text_field(product, "name"),
        price: price_field(offer, "price").or_else(|| price_field(offer, "lowPrice")),
        availability: text_field(offer, "availability"),
        product_id: text_field(product, "productID"),
        // offer-level sku is the variant's, more specific than the product's
        sku: text_field(offer, "sku").or_else(|| text_field(product, "sku")),
        upc: text_field(product, "gtin12")
            .or_else(|| text_field(product, "gtin13"))
            .or_else(|| text_field(product, "gtin")),
        brand: brand_field(product),
        caliber: None,
        grain_weight: None,
        round_count: None,
        currency: text_field(offer, "priceCurrency"),
        shipping: None,
    }
}

fn text_field(node: &Value, key: &str) -> Option<String> {
    match node.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn price_field(node: &Value, key: &str) -> Option<RawPrice> {
    match node.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(RawPrice::Text(s.trim().to_string())),
        Value::Number(n) => n.as_f64().map(RawPrice::Number),
        _ => None,
    }
}

/// `brand` is either a plain string or a nested `Brand` object.
fn brand_field(product: &Value) -> Option<String> {
    match product.get("brand")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(_) => text_field(product.get("brand")?, "name"),
        _ => None,
    }
}
