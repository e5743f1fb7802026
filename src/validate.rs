//! Offer validation verdicts.
//!
//! Three-way outcome: `Ok` offers go to the store, `Drop` offers are
//! discarded with a reason, `Quarantine` offers are parked for manual
//! review. Quarantine is reserved for exactly one case — an otherwise
//! valid offer that could not be assigned an identity key. Everything
//! else that fails is a drop: a missing price or title means the offer is
//! worthless, but a missing identity means a good offer we cannot safely
//! upsert, and deleting those silently would hide a real extraction bug.

use serde::{Deserialize, Serialize};

use crate::types::{Availability, NormalizedOffer};

/// Why an offer was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingSourceId,
    MissingRetailerId,
    MissingUrl,
    MissingTitle,
    /// Price absent, zero, or negative.
    InvalidPrice,
    UnknownAvailability,
    MissingAdapterVersion,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingSourceId => "missing_source_id",
            DropReason::MissingRetailerId => "missing_retailer_id",
            DropReason::MissingUrl => "missing_url",
            DropReason::MissingTitle => "missing_title",
            DropReason::InvalidPrice => "invalid_price",
            DropReason::UnknownAvailability => "unknown_availability",
            DropReason::MissingAdapterVersion => "missing_adapter_version",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an offer was parked instead of stored or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    MissingIdentityKey,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::MissingIdentityKey => "missing_identity_key",
        }
    }
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation verdict for one normalized offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Disposition {
    Ok,
    Drop(DropReason),
    Quarantine(QuarantineReason),
}

impl Disposition {
    pub fn is_ok(&self) -> bool {
        matches!(self, Disposition::Ok)
    }
}

/// Applies the validation rules in order. Drop checks run first, so an
/// offer failing both a drop rule and the identity rule reports the drop —
/// quarantine is only for offers whose sole defect is a missing identity.
pub fn validate_offer(offer: &NormalizedOffer) -> Disposition {
    if offer.source_id.trim().is_empty() {
        return Disposition::Drop(DropReason::MissingSourceId);
    }
    if offer.retailer_id.trim().is_empty() {
        return Disposition::Drop(DropReason::MissingRetailerId);
    }
    if offer.url.trim().is_empty() {
        return Disposition::Drop(DropReason::MissingUrl);
    }
    if offer.title.as_deref().map(str::trim).is_none_or(str::is_empty) {
        return Disposition::Drop(DropReason::MissingTitle);
    }
    match offer.price_cents {
        Some(cents) if cents > 0 => {}
        _ => return Disposition::Drop(DropReason::InvalidPrice),
    }
    if offer.availability == Availability::Unknown {
        return Disposition::Drop(DropReason::UnknownAvailability);
    }
    if offer.adapter_version.as_deref().map(str::trim).is_none_or(str::is_empty) {
        return Disposition::Drop(DropReason::MissingAdapterVersion);
    }
    if offer.identity_key.is_none() {
        return Disposition::Quarantine(QuarantineReason::MissingIdentityKey);
    }
    Disposition::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKey;
    use chrono::{TimeZone, Utc};

    fn offer() -> NormalizedOffer {
        NormalizedOffer {
            source_id: "src-ammobunker".to_string(),
            retailer_id: "ammobunker".to_string(),
            url: "https://www.ammobunker.com/ammo/9mm-fmj".to_string(),
            title: Some("9mm FMJ 115gr".to_string()),
            price_cents: Some(1499),
            currency: "USD".to_string(),
            availability: Availability::InStock,
            observed_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            identity_key: Some(IdentityKey::parse("SKU:MGT-9A").unwrap()),
            adapter_version: Some("1.4.0".to_string()),
            product_id: None,
            sku: Some("MGT-9A".to_string()),
            upc: None,
            brand: None,
            caliber: None,
            grain_weight: Some(115),
            round_count: Some(50),
            shipping_cents: None,
            cost_per_round_cents: Some(30),
        }
    }

    #[test]
    fn complete_offer_is_ok() {
        assert_eq!(validate_offer(&offer()), Disposition::Ok);
    }

    #[test]
    fn drop_reasons_fire_per_field() {
        let mut o = offer();
        o.title = None;
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::MissingTitle));

        let mut o = offer();
        o.title = Some("   ".to_string());
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::MissingTitle));

        let mut o = offer();
        o.price_cents = None;
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::InvalidPrice));

        let mut o = offer();
        o.price_cents = Some(0);
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::InvalidPrice));

        let mut o = offer();
        o.price_cents = Some(-100);
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::InvalidPrice));

        let mut o = offer();
        o.availability = Availability::Unknown;
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::UnknownAvailability));

        let mut o = offer();
        o.adapter_version = None;
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::MissingAdapterVersion));

        let mut o = offer();
        o.source_id = String::new();
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::MissingSourceId));

        let mut o = offer();
        o.retailer_id = String::new();
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::MissingRetailerId));

        let mut o = offer();
        o.url = String::new();
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::MissingUrl));
    }

    #[test]
    fn missing_identity_alone_quarantines() {
        let mut o = offer();
        o.identity_key = None;
        assert_eq!(
            validate_offer(&o),
            Disposition::Quarantine(QuarantineReason::MissingIdentityKey)
        );
    }

    #[test]
    fn drop_takes_precedence_over_quarantine() {
        let mut o = offer();
        o.identity_key = None;
        o.price_cents = None;
        assert_eq!(validate_offer(&o), Disposition::Drop(DropReason::InvalidPrice));
    }

    #[test]
    fn out_of_stock_with_price_is_still_ok() {
        let mut o = offer();
        o.availability = Availability::OutOfStock;
        assert_eq!(validate_offer(&o), Disposition::Ok);
    }

    #[test]
    fn disposition_serializes_with_reason() {
        let json = serde_json::to_string(&Disposition::Drop(DropReason::InvalidPrice)).unwrap();
        assert_eq!(json, "{\"verdict\":\"drop\",\"reason\":\"invalid_price\"}");
        let json = serde_json::to_string(&Disposition::Ok).unwrap();
        assert_eq!(json, "{\"verdict\":\"ok\"}");
    }
}
