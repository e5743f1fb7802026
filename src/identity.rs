//! Stable cross-run identity keys for listings.
//!
//! A listing is identified by the retailer's own product id when one exists,
//! falling back to the retailer SKU, falling back to a short hash of the
//! canonical URL. The key survives re-scrapes as long as the retailer keeps
//! its identifiers, which is what lets repeated observations of one listing
//! collapse onto one product row downstream.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Maximum length of the value portion of an identity key.
pub const MAX_IDENTITY_VALUE_LEN: usize = 255;

/// Hex characters of the canonical-URL digest kept in a `URL:` key.
const URL_HASH_LEN: usize = 16;

/// The source an identity key was derived from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentityKind {
    Pid,
    Sku,
    Url,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Pid => "PID",
            IdentityKind::Sku => "SKU",
            IdentityKind::Url => "URL",
        }
    }
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from parsing an identity key off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IdentityKeyError {
    #[error("invalid identity key: {0}")]
    Invalid(String),
}

/// A validated `TYPE:VALUE` identity key.
///
/// Wire format is ASCII `TYPE:VALUE` with TYPE one of `PID`, `SKU`, `URL`.
/// The value is non-empty, contains no `:`, and is at most
/// [`MAX_IDENTITY_VALUE_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derives a key from retailer identifiers, preferring the product id
    /// over the SKU over a hash of the canonical URL.
    ///
    /// A product id or SKU that is blank after trimming, contains `:`, or
    /// exceeds the length cap is treated as absent rather than producing an
    /// invalid key. The URL branch always succeeds and is deterministic:
    /// the same canonical URL yields the same 16-hex-char suffix.
    pub fn generate(pid: Option<&str>, sku: Option<&str>, canonical_url: &Url) -> IdentityKey {
        match Self::from_retailer_ids(pid, sku) {
            Some(key) => key,
            None => Self::from_url_hash(canonical_url),
        }
    }

    /// Derives a key from the retailer's own identifiers only, when either
    /// qualifies. Used directly when no canonical URL is available.
    pub fn from_retailer_ids(pid: Option<&str>, sku: Option<&str>) -> Option<IdentityKey> {
        if let Some(value) = usable_value(pid) {
            return Some(IdentityKey(format!("PID:{value}")));
        }
        usable_value(sku).map(|value| IdentityKey(format!("SKU:{value}")))
    }

    fn from_url_hash(canonical_url: &Url) -> IdentityKey {
        let digest = Sha256::digest(canonical_url.as_str().as_bytes());
        let hex = hex::encode(digest);
        IdentityKey(format!("URL:{}", &hex[..URL_HASH_LEN]))
    }

    /// Parses and validates a wire-format key.
    pub fn parse(raw: &str) -> Result<IdentityKey, IdentityKeyError> {
        let Some((kind, value)) = raw.split_once(':') else {
            return Err(IdentityKeyError::Invalid(format!(
                "missing `:` separator in `{raw}`"
            )));
        };
        if !matches!(kind, "PID" | "SKU" | "URL") {
            return Err(IdentityKeyError::Invalid(format!(
                "unknown key type `{kind}`"
            )));
        }
        if value.is_empty() {
            return Err(IdentityKeyError::Invalid("empty value".to_string()));
        }
        if value.contains(':') {
            return Err(IdentityKeyError::Invalid(format!(
                "value contains `:` in `{raw}`"
            )));
        }
        if value.len() > MAX_IDENTITY_VALUE_LEN {
            return Err(IdentityKeyError::Invalid(format!(
                "value exceeds {MAX_IDENTITY_VALUE_LEN} chars"
            )));
        }
        Ok(IdentityKey(raw.to_string()))
    }

    pub fn kind(&self) -> IdentityKind {
        match self.0.split_once(':') {
            Some(("PID", _)) => IdentityKind::Pid,
            Some(("SKU", _)) => IdentityKind::Sku,
            _ => IdentityKind::Url,
        }
    }

    pub fn value(&self) -> &str {
        match self.0.split_once(':') {
            Some((_, value)) => value,
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> String {
        key.0
    }
}

fn usable_value(candidate: Option<&str>) -> Option<&str> {
    let trimmed = candidate?.trim();
    let ok = !trimmed.is_empty()
        && !trimmed.contains(':')
        && trimmed.len() <= MAX_IDENTITY_VALUE_LEN;
    ok.then_some(trimmed)
}
