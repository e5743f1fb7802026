//! Scrape-ingestion framework for retail product offers.
//!
//! The crate turns "fetch this product URL for this retailer" into
//! validated, identity-keyed offer records, while enforcing the
//! politeness and safety rules scraping third-party storefronts demands:
//!
//! ```text
//! target url
//!    |
//!    v
//! FetchPolicyEngine      host allow-list -> private-address guard ->
//!    |                   robots.txt (fail closed) -> per-domain pacing
//!    v
//! SitePlugin::extract_raw    site-specific, pure, fixture-testable
//!    |
//!    v
//! normalize_offer + validate_offer    canonical record, ok/drop/quarantine
//!    |
//!    v
//! OfferStore    upsert keyed by (source, identity key, observed-at)
//! ```
//!
//! Site integrations implement [`SitePlugin`] and register in a
//! [`PluginRegistry`]; [`ingest_target`] drives one URL through the whole
//! pipeline. The offer's `observed_at` always comes from the
//! [`RunContext`], so retrying a failed run updates the same observation
//! instead of fabricating a new one.

pub mod adapters;
pub mod bridge;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod normalize;
pub mod plugin;
pub mod policy;
pub mod registry;
pub mod run;
pub mod store;
pub mod types;
pub mod urlnorm;
pub mod validate;

pub use bridge::{LegacyFailureKind, LegacyScrapeError, LegacySiteAdapter, PluginBridge};
pub use config::{ScrapeConfigReport, SourceScrapeConfig, validate_scrape_config};
pub use identity::{IdentityKey, IdentityKeyError, IdentityKind};
pub use metrics::{IngestMetrics, NullMetrics};
pub use normalize::{NormalizeOutcome, classify_availability, normalize_offer};
pub use plugin::{
    ExtractFailure, ExtractFailureKind, FetchOverrides, ManifestError, PluginManifest, PluginMode,
    SitePlugin,
};
pub use policy::{
    FetchPolicyEngine, FetchResult, FetchStatus, FetcherConfig, PolicyRequest, RateLimitOverride,
};
pub use registry::{ParityReport, PluginLoader, PluginRegistry, RegistryError};
pub use run::RunContext;
pub use store::{MemoryOfferStore, OfferStore, QuarantinedOffer, StoreError, UpsertOutcome};
pub use types::{Availability, NormalizedOffer, RawOffer, RawPrice};
pub use urlnorm::{UrlError, canonicalize_url, registrable_domain};
pub use validate::{Disposition, DropReason, QuarantineReason, validate_offer};

use serde_json::Value;
use tracing::{Instrument, Level, debug, error, info, span, warn};

/// What one [`ingest_target`] call did.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub fetch_status: FetchStatus,
    /// Extraction failure, when the fetch succeeded but extraction did not.
    pub extract_failure: Option<ExtractFailure>,
    pub upserted: usize,
    pub dropped: usize,
    pub quarantined: usize,
    /// Offers lost to store failures; upsert and quarantine both count.
    pub store_errors: usize,
    pub elapsed_ms: u64,
}

impl IngestOutcome {
    fn for_fetch(status: FetchStatus) -> Self {
        IngestOutcome {
            fetch_status: status,
            extract_failure: None,
            upserted: 0,
            dropped: 0,
            quarantined: 0,
            store_errors: 0,
            elapsed_ms: 0,
        }
    }

    /// True when the page was fetched, extracted, and fully persisted.
    pub fn succeeded(&self) -> bool {
        self.fetch_status == FetchStatus::Ok
            && self.extract_failure.is_none()
            && self.store_errors == 0
    }
}

/// Ingests one target URL through a plugin: fetch under policy, extract,
/// normalize, validate, and persist. Never returns an error — every way a
/// target can fail is a recorded outcome, and one bad URL must not abort
/// the rest of a run.
pub async fn ingest_target(
    plugin: &dyn SitePlugin,
    target_url: &str,
    ctx: &RunContext,
    engine: &FetchPolicyEngine,
    store: &dyn OfferStore,
    metrics: &dyn IngestMetrics,
    overrides: &FetchOverrides,
) -> IngestOutcome {
    let manifest = plugin.manifest();
    let span = span!(
        Level::INFO,
        "ingest_target",
        plugin = %manifest.id,
        source = %ctx.source_id,
        run = %ctx.run_id,
        attempt = ctx.attempt,
        url = target_url,
    );
    ingest_target_inner(plugin, target_url, ctx, engine, store, metrics, overrides)
        .instrument(span)
        .await
}

async fn ingest_target_inner(
    plugin: &dyn SitePlugin,
    target_url: &str,
    ctx: &RunContext,
    engine: &FetchPolicyEngine,
    store: &dyn OfferStore,
    metrics: &dyn IngestMetrics,
    overrides: &FetchOverrides,
) -> IngestOutcome {
    let started = std::time::Instant::now();
    let manifest = plugin.manifest();
    // the plugin that extracts stamps the version, whatever the caller had
    let ctx = ctx.clone().with_adapter_version(&manifest.version);

    let fetched = plugin.fetch_raw(engine, target_url, overrides).await;
    metrics.record_fetch(&ctx.source_id, fetched.status, fetched.duration_ms);
    let mut outcome = IngestOutcome::for_fetch(fetched.status);

    let body = match (fetched.status, fetched.body) {
        (FetchStatus::Ok, Some(body)) => body,
        (status, _) => {
            warn!(
                status = %status,
                status_code = fetched.status_code,
                error = fetched.error.as_deref().unwrap_or(""),
                "fetch_failed"
            );
            outcome.elapsed_ms = started.elapsed().as_millis() as u64;
            return outcome;
        }
    };

    let raw_offers = match plugin.extract_raw(&body, target_url) {
        Ok(raw_offers) => raw_offers,
        Err(failure) => {
            metrics.record_extract_failure(&ctx.source_id, failure.kind);
            warn!(
                kind = %failure.kind,
                detail = %failure.detail,
                drift = failure.kind.is_drift_signal(),
                "extract_failed"
            );
            outcome.extract_failure = Some(failure);
            outcome.elapsed_ms = started.elapsed().as_millis() as u64;
            return outcome;
        }
    };

    for raw in &raw_offers {
        let normalized = plugin.normalize_raw(raw, &ctx);
        metrics.record_disposition(&ctx.source_id, &normalized.disposition);
        match normalized.disposition {
            Disposition::Ok => match store.upsert_offer(&normalized.offer).await {
                Ok(_) => outcome.upserted += 1,
                Err(err) => {
                    outcome.store_errors += 1;
                    error!(url = %normalized.offer.url, error = %err, "offer_store_failed");
                }
            },
            Disposition::Drop(reason) => {
                outcome.dropped += 1;
                debug!(url = %normalized.offer.url, reason = %reason, "offer_dropped");
            }
            Disposition::Quarantine(reason) => {
                let parked = QuarantinedOffer {
                    source_id: ctx.source_id.clone(),
                    url: normalized.offer.url.clone(),
                    reason,
                    payload: serde_json::to_value(raw).unwrap_or(Value::Null),
                    observed_at: ctx.run_observed_at,
                };
                match store.quarantine_offer(&parked).await {
                    Ok(()) => {
                        outcome.quarantined += 1;
                        info!(url = %parked.url, reason = %reason, "offer_quarantined");
                    }
                    Err(err) => {
                        outcome.store_errors += 1;
                        error!(url = %parked.url, error = %err, "offer_quarantine_failed");
                    }
                }
            }
        }
    }

    outcome.elapsed_ms = started.elapsed().as_millis() as u64;
    metrics.record_run(&ctx.source_id, outcome.upserted, outcome.dropped, outcome.quarantined);
    info!(
        offers = raw_offers.len(),
        upserted = outcome.upserted,
        dropped = outcome.dropped,
        quarantined = outcome.quarantined,
        store_errors = outcome.store_errors,
        elapsed_ms = outcome.elapsed_ms,
        "ingest_complete"
    );
    outcome
}
