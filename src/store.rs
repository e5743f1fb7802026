//! Persistence boundary for ingested offers.
//!
//! The pipeline writes through [`OfferStore`]; the production
//! implementation lives with the serving stack and is out of scope here.
//! [`MemoryOfferStore`] backs tests and local runs. Upsert identity is
//! `(source, identity key, observed-at)`: re-running an attempt of the
//! same run updates the existing row instead of inserting a sibling,
//! which is what makes retries observation-idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::NormalizedOffer;
use crate::validate::QuarantineReason;

/// Result of persisting one offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
}

/// An offer parked for manual review instead of stored or dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedOffer {
    pub source_id: String,
    pub url: String,
    pub reason: QuarantineReason,
    /// The offer as it looked when quarantined.
    pub payload: Value,
    pub observed_at: DateTime<Utc>,
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Inserts or updates one offer keyed by its observation identity.
    async fn upsert_offer(&self, offer: &NormalizedOffer) -> Result<UpsertOutcome, StoreError>;

    /// Parks an offer for review.
    async fn quarantine_offer(&self, offer: &QuarantinedOffer) -> Result<(), StoreError>;
}

type ObservationKey = (String, String, DateTime<Utc>);

/// In-memory store for tests and local runs.
#[derive(Default)]
pub struct MemoryOfferStore {
    offers: DashMap<ObservationKey, NormalizedOffer>,
    quarantined: std::sync::Mutex<Vec<QuarantinedOffer>>,
}

impl MemoryOfferStore {
    pub fn new() -> Self {
        MemoryOfferStore::default()
    }

    pub fn offer_count(&self) -> usize {
        self.offers.len()
    }

    /// Offers for one source, ordered by `(identity key, observed at)` so
    /// assertions are deterministic.
    pub fn offers_for_source(&self, source_id: &str) -> Vec<NormalizedOffer> {
        let mut offers: Vec<NormalizedOffer> = self
            .offers
            .iter()
            .filter(|entry| entry.key().0 == source_id)
            .map(|entry| entry.value().clone())
            .collect();
        offers.sort_by(|a, b| {
            let left = (a.identity_key.as_ref().map(|k| k.as_str().to_string()), a.observed_at);
            let right = (b.identity_key.as_ref().map(|k| k.as_str().to_string()), b.observed_at);
            left.cmp(&right)
        });
        offers
    }

    pub fn quarantined(&self) -> Vec<QuarantinedOffer> {
        self.quarantined.lock().unwrap().clone()
    }
}

#[async_trait]
impl OfferStore for MemoryOfferStore {
    async fn upsert_offer(&self, offer: &NormalizedOffer) -> Result<UpsertOutcome, StoreError> {
        let identity = offer
            .identity_key
            .as_ref()
            .map(|key| key.as_str().to_string())
            // caller guarantees a key for ok offers; fall back to the url
            // so even a misuse cannot alias distinct listings
            .unwrap_or_else(|| offer.url.clone());
        let key = (offer.source_id.clone(), identity, offer.observed_at);
        let previous = self.offers.insert(key, offer.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn quarantine_offer(&self, offer: &QuarantinedOffer) -> Result<(), StoreError> {
        self.quarantined.lock().unwrap().push(offer.clone());
        Ok(())
    }
}
