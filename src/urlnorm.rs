//! URL canonicalization and registrable-domain derivation.
//!
//! Every URL that crosses a component boundary (identity keys, robots cache
//! keys, rate-limiter keys, persisted offers) goes through [`canonicalize_url`]
//! first so that the same listing always produces the same string. Domain
//! derivation uses the public-suffix list so `shop.example.co.uk` and
//! `www.example.co.uk` share one politeness budget.

use thiserror::Error;
use url::Url;

/// Query parameters stripped during canonicalization, exact-name matches.
/// `utm_`-prefixed parameters are stripped as a family.
const TRACKING_PARAMS: [&str; 5] = ["fbclid", "gclid", "ref", "source", "campaign"];

/// Errors from URL canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UrlError {
    /// Input could not be parsed as an absolute http(s) URL.
    #[error("invalid url: {0}")]
    Invalid(String),
}

/// Canonicalizes a URL into the form used for identity and persistence.
///
/// Rules, applied in order:
/// - scheme forced to `https` (plain `http` is upgraded, anything else fails)
/// - host lowercased
/// - fragment stripped
/// - tracking parameters (`utm_*`, `fbclid`, `gclid`, `ref`, `source`,
///   `campaign`) and empty-valued parameters stripped
/// - remaining parameters sorted by `(key, value)`
/// - trailing slash dropped, except for the root path
///
/// The function is idempotent: feeding its output back in returns the same
/// URL.
///
/// # Examples
///
/// ```
/// use scout_ingest::urlnorm::canonicalize_url;
///
/// let url = canonicalize_url("http://Shop.Example.com/ammo/9mm/?utm_source=x&b=2&a=1#top")
///     .unwrap();
/// assert_eq!(url.as_str(), "https://shop.example.com/ammo/9mm?a=1&b=2");
/// ```
pub fn canonicalize_url(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    let mut url =
        Url::parse(trimmed).map_err(|err| UrlError::Invalid(format!("{trimmed}: {err}")))?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if url.set_scheme("https").is_err() {
                return Err(UrlError::Invalid(format!("{trimmed}: cannot upgrade scheme")));
            }
        }
        other => {
            return Err(UrlError::Invalid(format!("unsupported scheme `{other}`")));
        }
    }

    if url.host_str().is_none() {
        return Err(UrlError::Invalid(format!("{trimmed}: missing host")));
    }

    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.retain(|(k, v)| !is_tracking_param(k) && !v.is_empty());
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &params {
            pairs.append_pair(k, v);
        }
        drop(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Derives the registrable domain (eTLD+1) of a URL.
///
/// Multi-part public suffixes are handled (`a.b.co.uk` -> `b.co.uk`). When
/// the host is not under a known public suffix (IP literals, bare labels),
/// the raw lowercase hostname is returned instead so callers always get a
/// usable cache key.
pub fn registrable_domain(url: &Url) -> String {
    let host = url
        .host_str()
        .unwrap_or_default()
        .trim_end_matches('.')
        .to_ascii_lowercase();
    match psl::domain_str(&host) {
        Some(domain) => domain.to_string(),
        None => host,
    }
}
