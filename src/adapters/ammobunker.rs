//! Ammo Bunker: schema.org JSON-LD product pages.
//!
//! The reference HTML adapter. Everything it needs is in the page's
//! `ld+json` blocks, which makes it a template for the common case: scan,
//! locate the `Product`, map its offers, and classify anything that went
//! wrong into the shared failure taxonomy.

use url::Url;

use crate::adapters::jsonld::{offers_of, product_nodes, raw_offer_from_product, scan_ld_json};
use crate::normalize::classify_availability;
use crate::plugin::{ExtractFailure, ExtractFailureKind, PluginManifest, PluginMode, SitePlugin};
use crate::policy::{RateLimitOverride, body_looks_blocked};
use crate::types::{Availability, RawOffer};

pub struct AmmoBunker {
    manifest: PluginManifest,
}

impl AmmoBunker {
    pub fn new() -> Self {
        let base_urls = ["https://www.ammobunker.com", "https://ammobunker.com"]
            .iter()
            .filter_map(|raw| Url::parse(raw).ok())
            .collect();
        AmmoBunker {
            manifest: PluginManifest {
                id: "ammobunker".to_string(),
                name: "Ammo Bunker".to_string(),
                version: "1.4.0".to_string(),
                mode: PluginMode::Html,
                base_urls,
                rate_limit: Some(RateLimitOverride {
                    requests_per_second: Some(0.5),
                    min_delay_ms: Some(1500),
                    max_concurrent: Some(1),
                }),
            },
        }
    }
}

impl Default for AmmoBunker {
    fn default() -> Self {
        AmmoBunker::new()
    }
}

impl SitePlugin for AmmoBunker {
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
        if body_looks_blocked(body) {
            return Err(ExtractFailure::new(
                ExtractFailureKind::BlockedPage,
                "bot challenge markup instead of a product page",
            ));
        }

        let scan = scan_ld_json(body);
        if scan.script_count == 0 {
            return Err(ExtractFailure::new(
                ExtractFailureKind::SelectorNotFound,
                "no application/ld+json blocks in page",
            ));
        }

        let products = product_nodes(&scan);
        if products.is_empty() {
            return Err(ExtractFailure::new(
                ExtractFailureKind::PageStructureChanged,
                format!(
                    "{} ld+json block(s) but no schema.org Product node",
                    scan.blocks.len()
                ),
            ));
        }

        let mut raw_offers = Vec::new();
        for product in &products {
            for offer in offers_of(product) {
                raw_offers.push(raw_offer_from_product(product, offer, url));
            }
        }

        if raw_offers.is_empty() {
            return Err(ExtractFailure::new(
                ExtractFailureKind::PriceNotFound,
                "Product node carries no offers",
            ));
        }

        if raw_offers.len() == 1 {
            let only = &raw_offers[0];
            if only.title.is_none() {
                return Err(ExtractFailure::new(
                    ExtractFailureKind::TitleNotFound,
                    "Product node has no name",
                ));
            }
            if only.price.is_none() {
                let availability = classify_availability(only.availability.as_deref());
                return Err(if availability == Availability::OutOfStock {
                    ExtractFailure::new(
                        ExtractFailureKind::OosNoPrice,
                        "out-of-stock listing hides its price",
                    )
                } else {
                    ExtractFailure::new(
                        ExtractFailureKind::PriceNotFound,
                        "offer node has no price",
                    )
                });
            }
        } else {
            // variants are fine as long as something tells them apart
            let distinguishable = raw_offers
                .iter()
                .all(|o| o.sku.is_some() || o.product_id.is_some());
            if !distinguishable {
                return Err(ExtractFailure::new(
                    ExtractFailureKind::AmbiguousVariants,
                    format!("{} offers with no per-variant sku or id", raw_offers.len()),
                ));
            }
        }

        Ok(raw_offers)
    }
}
