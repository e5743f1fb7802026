//! Bridge from the plugin contract to the legacy one-offer adapter shape.
//!
//! The previous generation of site adapters worked on exactly one URL and
//! returned exactly one offer, with the caller doing the fetching. Parts
//! of the scheduler still speak that interface. [`PluginBridge`] lets a
//! modern plugin serve those callers: the caller's already-fetched body is
//! reused (never a second fetch), multi-offer extractions are reduced to
//! one offer deterministically, and failure kinds are remapped into the
//! smaller legacy vocabulary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::plugin::{ExtractFailure, ExtractFailureKind, SitePlugin};
use crate::run::RunContext;
use crate::types::{NormalizedOffer, RawOffer};
use crate::validate::{Disposition, DropReason, validate_offer};

/// The legacy failure vocabulary. Same names as the modern taxonomy minus
/// `AMBIGUOUS_VARIANTS`, which predates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyFailureKind {
    SelectorNotFound,
    PriceNotFound,
    TitleNotFound,
    PageStructureChanged,
    BlockedPage,
    EmptyPage,
    OosNoPrice,
}

impl LegacyFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyFailureKind::SelectorNotFound => "SELECTOR_NOT_FOUND",
            LegacyFailureKind::PriceNotFound => "PRICE_NOT_FOUND",
            LegacyFailureKind::TitleNotFound => "TITLE_NOT_FOUND",
            LegacyFailureKind::PageStructureChanged => "PAGE_STRUCTURE_CHANGED",
            LegacyFailureKind::BlockedPage => "BLOCKED_PAGE",
            LegacyFailureKind::EmptyPage => "EMPTY_PAGE",
            LegacyFailureKind::OosNoPrice => "OOS_NO_PRICE",
        }
    }
}

impl std::fmt::Display for LegacyFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ExtractFailureKind> for LegacyFailureKind {
    fn from(kind: ExtractFailureKind) -> Self {
        match kind {
            ExtractFailureKind::SelectorNotFound => LegacyFailureKind::SelectorNotFound,
            ExtractFailureKind::PriceNotFound => LegacyFailureKind::PriceNotFound,
            ExtractFailureKind::TitleNotFound => LegacyFailureKind::TitleNotFound,
            ExtractFailureKind::PageStructureChanged => LegacyFailureKind::PageStructureChanged,
            ExtractFailureKind::BlockedPage => LegacyFailureKind::BlockedPage,
            ExtractFailureKind::EmptyPage => LegacyFailureKind::EmptyPage,
            // no legacy category for this; structure-changed is the
            // closest "page did not look like we expect" bucket
            ExtractFailureKind::AmbiguousVariants => LegacyFailureKind::PageStructureChanged,
            ExtractFailureKind::OosNoPrice => LegacyFailureKind::OosNoPrice,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct LegacyScrapeError {
    pub kind: LegacyFailureKind,
    pub detail: String,
}

impl LegacyScrapeError {
    fn new(kind: LegacyFailureKind, detail: impl Into<String>) -> Self {
        LegacyScrapeError { kind, detail: detail.into() }
    }
}

impl From<ExtractFailure> for LegacyScrapeError {
    /// Remaps the kind; the original detail string travels unchanged so
    /// diagnostics still say what actually happened.
    fn from(failure: ExtractFailure) -> Self {
        LegacyScrapeError { kind: failure.kind.into(), detail: failure.detail }
    }
}

/// The legacy contract: one pre-fetched page in, one validated offer out.
pub trait LegacySiteAdapter: Send + Sync {
    fn scrape(
        &self,
        body: &str,
        url: &str,
        ctx: &RunContext,
    ) -> Result<NormalizedOffer, LegacyScrapeError>;
}

/// Adapts a [`SitePlugin`] to [`LegacySiteAdapter`].
pub struct PluginBridge {
    plugin: Arc<dyn SitePlugin>,
}

impl PluginBridge {
    pub fn new(plugin: Arc<dyn SitePlugin>) -> Self {
        PluginBridge { plugin }
    }

    /// Reduces a multi-offer extraction to the single offer the legacy
    /// caller expects. A `sku` query parameter on the target URL picks the
    /// matching variant; otherwise the lexicographically first offer by
    /// `(url, product id, sku)` wins, so the same payload always selects
    /// the same offer.
    fn select_offer(url: &str, mut offers: Vec<RawOffer>) -> Option<RawOffer> {
        if offers.is_empty() {
            return None;
        }
        if let Some(wanted) = sku_query_param(url) {
            if let Some(position) = offers.iter().position(|offer| {
                offer.product_id.as_deref() == Some(wanted.as_str())
                    || offer.sku.as_deref() == Some(wanted.as_str())
            }) {
                return Some(offers.swap_remove(position));
            }
        }
        offers
            .into_iter()
            .min_by_key(|offer| (offer.url.clone(), offer.product_id.clone(), offer.sku.clone()))
    }
}

fn sku_query_param(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "sku")
        .map(|(_, value)| value.into_owned())
}

impl LegacySiteAdapter for PluginBridge {
    fn scrape(
        &self,
        body: &str,
        url: &str,
        ctx: &RunContext,
    ) -> Result<NormalizedOffer, LegacyScrapeError> {
        let offers = self.plugin.extract_raw(body, url)?;
        let Some(selected) = Self::select_offer(url, offers) else {
            return Err(LegacyScrapeError::new(
                LegacyFailureKind::SelectorNotFound,
                "extraction yielded no offers",
            ));
        };

        let ctx = ctx.clone().with_adapter_version(&self.plugin.manifest().version);
        let outcome = self.plugin.normalize_raw(&selected, &ctx);

        // the legacy callers had their own validator; run ours again on
        // the final offer as the equivalent guardrail
        match validate_offer(&outcome.offer) {
            Disposition::Ok => Ok(outcome.offer),
            Disposition::Drop(DropReason::InvalidPrice) => Err(LegacyScrapeError::new(
                LegacyFailureKind::PriceNotFound,
                "selected offer has no valid price",
            )),
            Disposition::Drop(DropReason::MissingTitle) => Err(LegacyScrapeError::new(
                LegacyFailureKind::TitleNotFound,
                "selected offer has no title",
            )),
            Disposition::Drop(reason) => Err(LegacyScrapeError::new(
                LegacyFailureKind::PageStructureChanged,
                format!("selected offer failed validation: {reason}"),
            )),
            Disposition::Quarantine(reason) => Err(LegacyScrapeError::new(
                LegacyFailureKind::PageStructureChanged,
                format!("selected offer failed validation: {reason}"),
            )),
        }
    }
}
