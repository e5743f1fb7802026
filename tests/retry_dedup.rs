use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use scout_ingest::adapters::AmmoBunker;
use scout_ingest::{
    ExtractFailure, FetchOverrides, FetchPolicyEngine, FetchResult, FetcherConfig,
    MemoryOfferStore, NullMetrics, PluginManifest, RawOffer, RunContext, SitePlugin,
    ingest_target,
};

const PAGE_URL: &str = "https://www.ammobunker.com/ammo/9mm-fmj-115gr";

const PRODUCT_PAGE: &str = r#"<html><head><script type="application/ld+json">
{"@type":"Product","name":"Magtech 9mm FMJ 115gr","sku":"MGT-9A",
 "offers":{"price":"14.99","priceCurrency":"USD",
           "availability":"https://schema.org/InStock"}}
</script></head><body></body></html>"#;

struct FixturePlugin {
    inner: AmmoBunker,
    page: String,
}

#[async_trait]
impl SitePlugin for FixturePlugin {
    fn manifest(&self) -> &PluginManifest {
        self.inner.manifest()
    }

    async fn fetch_raw(
        &self,
        _engine: &FetchPolicyEngine,
        _url: &str,
        _overrides: &FetchOverrides,
    ) -> FetchResult {
        FetchResult::ok(200, self.page.clone(), 9)
    }

    fn extract_raw(&self, body: &str, url: &str) -> Result<Vec<RawOffer>, ExtractFailure> {
        self.inner.extract_raw(body, url)
    }
}

fn fixture() -> FixturePlugin {
    FixturePlugin {
        inner: AmmoBunker::new(),
        page: PRODUCT_PAGE.to_string(),
    }
}

fn engine() -> FetchPolicyEngine {
    FetchPolicyEngine::new(FetcherConfig::default()).expect("default fetcher config")
}

/// A retried run must not grow the store: the retry carries the same
/// `run_observed_at`, so its offers land on the same observation row.
#[tokio::test]
async fn retried_run_collapses_to_one_observation() {
    let plugin = fixture();
    let store = MemoryOfferStore::new();
    let engine = engine();
    let observed = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();
    let first = RunContext::new("run-77", "ammobunker", "ammobunker", observed);

    let outcome = ingest_target(
        &plugin,
        PAGE_URL,
        &first,
        &engine,
        &store,
        &NullMetrics,
        &FetchOverrides::default(),
    )
    .await;
    assert_eq!(outcome.upserted, 1);
    assert_eq!(store.offer_count(), 1);

    let retry = first.next_attempt();
    assert_eq!(retry.attempt, 2);
    assert_eq!(retry.run_observed_at, first.run_observed_at);

    let outcome = ingest_target(
        &plugin,
        PAGE_URL,
        &retry,
        &engine,
        &store,
        &NullMetrics,
        &FetchOverrides::default(),
    )
    .await;
    assert_eq!(outcome.upserted, 1, "retry still reports the upsert");
    assert_eq!(store.offer_count(), 1, "no duplicate observation from the retry");

    let offers = store.offers_for_source("ammobunker");
    assert_eq!(offers[0].observed_at, observed);
}

/// Distinct runs are distinct observations even for the same listing;
/// history accumulates, only retries collapse.
#[tokio::test]
async fn separate_runs_keep_separate_observations() {
    let plugin = fixture();
    let store = MemoryOfferStore::new();
    let engine = engine();

    let monday = Utc.with_ymd_and_hms(2026, 2, 2, 6, 0, 0).unwrap();
    let tuesday = Utc.with_ymd_and_hms(2026, 2, 3, 6, 0, 0).unwrap();

    for (run_id, observed) in [("run-mon", monday), ("run-tue", tuesday)] {
        let ctx = RunContext::new(run_id, "ammobunker", "ammobunker", observed);
        let outcome = ingest_target(
            &plugin,
            PAGE_URL,
            &ctx,
            &engine,
            &store,
            &NullMetrics,
            &FetchOverrides::default(),
        )
        .await;
        assert_eq!(outcome.upserted, 1);
    }

    assert_eq!(store.offer_count(), 2);
    let offers = store.offers_for_source("ammobunker");
    assert_eq!(offers[0].observed_at, monday);
    assert_eq!(offers[1].observed_at, tuesday);
}
