//! The site plugin contract.
//!
//! A plugin owns everything retailer-specific: which hosts it may touch,
//! how pages are fetched, and how raw offers are pulled out of a page.
//! Fetching and normalization have default implementations so most
//! plugins only write [`SitePlugin::extract_raw`] — a pure function from
//! page text to raw offers, which keeps it trivially testable against
//! saved fixtures.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::normalize::{NormalizeOutcome, normalize_offer};
use crate::policy::{
    FetchPolicyEngine, FetchResult, PolicyRequest, RateLimitOverride,
    is_private_or_reserved_host,
};
use crate::run::RunContext;
use crate::types::RawOffer;

/// How a plugin's pages are fetched and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginMode {
    Html,
    Json,
}

/// Static description of a site plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Stable identifier, also the registry key.
    pub id: String,
    /// Human-readable retailer name.
    pub name: String,
    /// Bumped whenever extraction logic changes observably.
    pub version: String,
    pub mode: PluginMode,
    /// Hosts this plugin is allowed to fetch from. The policy engine
    /// refuses anything else.
    pub base_urls: Vec<Url>,
    /// Pacing override; absent fields use the global defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid manifest: {0}")]
pub struct ManifestError(pub String);

impl PluginManifest {
    /// Validates the manifest at registration time. Base URLs must be
    /// https with a real public host so a bad manifest cannot widen the
    /// fetch allow-list.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError("id must not be blank".into()));
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError(format!("plugin {:?} has a blank version", self.id)));
        }
        if self.base_urls.is_empty() {
            return Err(ManifestError(format!("plugin {:?} lists no base urls", self.id)));
        }
        for base in &self.base_urls {
            if base.scheme() != "https" {
                return Err(ManifestError(format!(
                    "base url {base} must use https"
                )));
            }
            let Some(host) = base.host_str() else {
                return Err(ManifestError(format!("base url {base} has no host")));
            };
            if is_private_or_reserved_host(host) {
                return Err(ManifestError(format!(
                    "base url {base} points at a private or reserved address"
                )));
            }
        }
        Ok(())
    }

    /// Registrable-domain keys this plugin claims, deduplicated.
    pub fn claimed_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .base_urls
            .iter()
            .map(crate::urlnorm::registrable_domain)
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }
}

/// Why extraction failed, in a fixed vocabulary shared by every plugin so
/// failures aggregate across retailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ExtractFailureKind {
    /// An anchor selector the extractor depends on matched nothing.
    SelectorNotFound,
    /// Product located but no price where one was expected.
    PriceNotFound,
    /// Product located but no usable title.
    TitleNotFound,
    /// Page recognizably changed shape; extractor needs attention.
    PageStructureChanged,
    /// Bot wall or challenge page instead of content.
    BlockedPage,
    /// Empty or effectively empty document.
    EmptyPage,
    /// Several variants on one page with no way to tell them apart.
    AmbiguousVariants,
    /// Product is out of stock and hides its price. Expected site
    /// behavior, kept distinct so it never counts toward drift alerts.
    OosNoPrice,
}

impl ExtractFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractFailureKind::SelectorNotFound => "SELECTOR_NOT_FOUND",
            ExtractFailureKind::PriceNotFound => "PRICE_NOT_FOUND",
            ExtractFailureKind::TitleNotFound => "TITLE_NOT_FOUND",
            ExtractFailureKind::PageStructureChanged => "PAGE_STRUCTURE_CHANGED",
            ExtractFailureKind::BlockedPage => "BLOCKED_PAGE",
            ExtractFailureKind::EmptyPage => "EMPTY_PAGE",
            ExtractFailureKind::AmbiguousVariants => "AMBIGUOUS_VARIANTS",
            ExtractFailureKind::OosNoPrice => "OOS_NO_PRICE",
        }
    }

    /// Whether this failure suggests the extractor has drifted from the
    /// live page. Blocked, empty, and out-of-stock pages are operational
    /// noise, not drift.
    pub fn is_drift_signal(&self) -> bool {
        match self {
            ExtractFailureKind::SelectorNotFound
            | ExtractFailureKind::PriceNotFound
            | ExtractFailureKind::TitleNotFound
            | ExtractFailureKind::PageStructureChanged
            | ExtractFailureKind::AmbiguousVariants => true,
            ExtractFailureKind::BlockedPage
            | ExtractFailureKind::EmptyPage
            | ExtractFailureKind::OosNoPrice => false,
        }
    }
}

impl std::fmt::Display for ExtractFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified extraction failure with site-specific detail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct ExtractFailure {
    pub kind: ExtractFailureKind,
    pub detail: String,
}

impl ExtractFailure {
    pub fn new(kind: ExtractFailureKind, detail: impl Into<String>) -> Self {
        ExtractFailure { kind, detail: detail.into() }
    }
}

/// Per-call knobs the orchestrator may pass through to a plugin.
#[derive(Debug, Clone, Default)]
pub struct FetchOverrides {
    pub rate_limit: Option<RateLimitOverride>,
    pub custom_headers: Option<HashMap<String, String>>,
    pub timeout_ms: Option<u64>,
}

/// One retailer integration.
#[async_trait]
pub trait SitePlugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    /// Fetches one page through the policy engine. The default wires the
    /// manifest's pacing and the caller's overrides into a policy request;
    /// plugins rarely need more.
    async fn fetch_raw(
        &self,
        engine: &FetchPolicyEngine,
        url: &str,
        overrides: &FetchOverrides,
    ) -> FetchResult {
        let manifest = self.manifest();
        let rate_limit = overrides.rate_limit.as_ref().or(manifest.rate_limit.as_ref());
        engine
            .fetch_with_policy(PolicyRequest {
                url,
                mode: manifest.mode,
                base_urls: &manifest.base_urls,
                rate_limit,
                headers: overrides.custom_headers.as_ref(),
                timeout_ms: overrides.timeout_ms,
            })
            .await
    }

    /// Pulls raw offers out of fetched page text. Pure: no network, no
    /// clock, no shared state.
    fn extract_raw(&self, body: &str, url: &str) -> Result<Vec<RawOffer>, ExtractFailure>;

    /// Converts one raw offer into a normalized offer plus its validation
    /// disposition. The default covers every known site; override only
    /// for genuinely exotic normalization.
    fn normalize_raw(&self, raw: &RawOffer, ctx: &RunContext) -> NormalizeOutcome {
        normalize_offer(raw, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> PluginManifest {
        PluginManifest {
            id: "ammobunker".to_string(),
            name: "Ammo Bunker".to_string(),
            version: "1.4.0".to_string(),
            mode: PluginMode::Html,
            base_urls: vec![Url::parse("https://www.ammobunker.com").unwrap()],
            rate_limit: None,
        }
    }

    #[test]
    fn valid_manifest_passes() {
        assert!(manifest().validate().is_ok());
    }

    #[test]
    fn blank_id_rejected() {
        let mut m = manifest();
        m.id = "  ".to_string();
        assert!(m.validate().is_err());
    }

    #[test]
    fn http_base_url_rejected() {
        let mut m = manifest();
        m.base_urls = vec![Url::parse("http://www.ammobunker.com").unwrap()];
        let err = m.validate().unwrap_err();
        assert!(err.0.contains("https"));
    }

    #[test]
    fn private_base_url_rejected() {
        let mut m = manifest();
        m.base_urls = vec![Url::parse("https://192.168.1.10").unwrap()];
        let err = m.validate().unwrap_err();
        assert!(err.0.contains("private"));
    }

    #[test]
    fn empty_base_urls_rejected() {
        let mut m = manifest();
        m.base_urls.clear();
        assert!(m.validate().is_err());
    }

    #[test]
    fn claimed_domains_dedupe_to_registrable() {
        let mut m = manifest();
        m.base_urls = vec![
            Url::parse("https://www.ammobunker.com").unwrap(),
            Url::parse("https://ammobunker.com").unwrap(),
            Url::parse("https://cdn.ammobunker.com").unwrap(),
        ];
        assert_eq!(m.claimed_domains(), vec!["ammobunker.com".to_string()]);
    }

    #[test]
    fn failure_kinds_serialize_screaming() {
        let json = serde_json::to_string(&ExtractFailureKind::OosNoPrice).unwrap();
        assert_eq!(json, "\"OOS_NO_PRICE\"");
        let kind: ExtractFailureKind = serde_json::from_str("\"SELECTOR_NOT_FOUND\"").unwrap();
        assert_eq!(kind, ExtractFailureKind::SelectorNotFound);
    }

    #[test]
    fn drift_signal_partition() {
        assert!(ExtractFailureKind::SelectorNotFound.is_drift_signal());
        assert!(ExtractFailureKind::AmbiguousVariants.is_drift_signal());
        assert!(!ExtractFailureKind::OosNoPrice.is_drift_signal());
        assert!(!ExtractFailureKind::BlockedPage.is_drift_signal());
        assert!(!ExtractFailureKind::EmptyPage.is_drift_signal());
    }

    #[test]
    fn failure_display_includes_detail() {
        let failure = ExtractFailure::new(ExtractFailureKind::PriceNotFound, "no .price node");
        assert_eq!(failure.to_string(), "PRICE_NOT_FOUND: no .price node");
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let m = manifest();
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"baseUrls\""));
        let back: PluginManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, m.id);
        assert_eq!(back.mode, PluginMode::Html);
    }
}
