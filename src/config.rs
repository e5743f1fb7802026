//! Per-source scrape configuration.
//!
//! Sources carry an operator-edited JSON blob that tunes fetching for one
//! retailer, e.g.:
//!
//! ```json
//! {
//!   "fetcherType": "http",
//!   "rateLimit": { "requestsPerSecond": 0.5, "minDelayMs": 1500 },
//!   "customHeaders": { "Accept-Language": "en-US" },
//!   "discovery": { "sitemap": "https://shop.example.com/sitemap.xml" }
//! }
//! ```
//!
//! [`validate_scrape_config`] checks such a blob against the fixed schema
//! before a run will use it. Unknown top-level keys are reported but
//! tolerated, since operators park notes and experimental flags there. A
//! known key with a bad type or value is a hard failure: a typo inside
//! `rateLimit` silently falling back to defaults is exactly how a site
//! gets hammered.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::RateLimitOverride;

const KNOWN_KEYS: &[&str] = &["fetcherType", "rateLimit", "customHeaders", "discovery"];

/// Typed view of a validated scrape config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceScrapeConfig {
    /// Only `"http"` is recognized.
    pub fetcher_type: Option<String>,
    pub rate_limit: Option<RateLimitOverride>,
    pub custom_headers: Option<HashMap<String, String>>,
    /// Opaque discovery settings, passed through to the scheduler.
    pub discovery: Option<Value>,
}

/// Outcome of validating one scrape config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConfigReport {
    pub ok: bool,
    /// Hard failures; non-empty exactly when `ok` is false.
    pub errors: Vec<String>,
    /// Soft warnings: top-level keys outside the schema, sorted.
    pub unknown_top_level_keys: Vec<String>,
    /// Present when validation passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<SourceScrapeConfig>,
}

impl ScrapeConfigReport {
    fn failed(errors: Vec<String>, unknown: Vec<String>) -> Self {
        ScrapeConfigReport { ok: false, errors, unknown_top_level_keys: unknown, config: None }
    }
}

/// Validates a scrape config document against the fixed schema.
pub fn validate_scrape_config(value: &Value) -> ScrapeConfigReport {
    let Some(object) = value.as_object() else {
        return ScrapeConfigReport::failed(
            vec!["scrape config must be a JSON object".to_string()],
            Vec::new(),
        );
    };

    let mut errors = Vec::new();
    let mut unknown: Vec<String> = object
        .keys()
        .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
        .cloned()
        .collect();
    unknown.sort();

    let mut config = SourceScrapeConfig::default();

    if let Some(fetcher_type) = object.get("fetcherType") {
        match fetcher_type.as_str() {
            Some("http") => config.fetcher_type = Some("http".to_string()),
            Some(other) => errors.push(format!("fetcherType must be \"http\", got {other:?}")),
            None => errors.push("fetcherType must be a string".to_string()),
        }
    }

    if let Some(rate_limit) = object.get("rateLimit") {
        match rate_limit.as_object() {
            Some(fields) => {
                let mut parsed = RateLimitOverride::default();
                if let Some(rps) = fields.get("requestsPerSecond") {
                    match rps.as_f64() {
                        Some(v) if v > 0.0 => parsed.requests_per_second = Some(v),
                        _ => errors
                            .push("rateLimit.requestsPerSecond must be a number > 0".to_string()),
                    }
                }
                if let Some(delay) = fields.get("minDelayMs") {
                    match delay.as_u64() {
                        Some(v) => parsed.min_delay_ms = Some(v),
                        None => errors
                            .push("rateLimit.minDelayMs must be a non-negative integer".to_string()),
                    }
                }
                if let Some(concurrent) = fields.get("maxConcurrent") {
                    match concurrent.as_u64() {
                        Some(v) if v > 0 && v <= u32::MAX as u64 => {
                            parsed.max_concurrent = Some(v as u32);
                        }
                        _ => errors
                            .push("rateLimit.maxConcurrent must be an integer > 0".to_string()),
                    }
                }
                config.rate_limit = Some(parsed);
            }
            None => errors.push("rateLimit must be an object".to_string()),
        }
    }

    if let Some(headers) = object.get("customHeaders") {
        match headers.as_object() {
            Some(fields) => {
                let mut parsed = HashMap::with_capacity(fields.len());
                for (name, header_value) in fields {
                    match header_value.as_str() {
                        Some(text) => {
                            parsed.insert(name.clone(), text.to_string());
                        }
                        None => errors.push(format!("customHeaders.{name} must be a string")),
                    }
                }
                config.custom_headers = Some(parsed);
            }
            None => errors.push("customHeaders must be an object of strings".to_string()),
        }
    }

    if let Some(discovery) = object.get("discovery") {
        if discovery.is_object() {
            config.discovery = Some(discovery.clone());
        } else {
            errors.push("discovery must be an object".to_string());
        }
    }

    if errors.is_empty() {
        ScrapeConfigReport { ok: true, errors, unknown_top_level_keys: unknown, config: Some(config) }
    } else {
        ScrapeConfigReport::failed(errors, unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_config_parses_fully() {
        let report = validate_scrape_config(&json!({
            "fetcherType": "http",
            "rateLimit": {"requestsPerSecond": 0.5, "minDelayMs": 1500, "maxConcurrent": 1},
            "customHeaders": {"Accept-Language": "en-US"},
            "discovery": {"sitemap": "https://x.com/sitemap.xml"},
        }));

        assert!(report.ok, "errors: {:?}", report.errors);
        assert!(report.unknown_top_level_keys.is_empty());
        let config = report.config.unwrap();
        assert_eq!(config.fetcher_type.as_deref(), Some("http"));
        let rate = config.rate_limit.unwrap();
        assert_eq!(rate.requests_per_second, Some(0.5));
        assert_eq!(rate.min_delay_ms, Some(1500));
        assert_eq!(rate.max_concurrent, Some(1));
    }

    #[test]
    fn empty_object_is_valid() {
        let report = validate_scrape_config(&json!({}));
        assert!(report.ok);
        assert_eq!(report.config, Some(SourceScrapeConfig::default()));
    }

    #[test]
    fn unknown_key_is_soft_warning() {
        let report = validate_scrape_config(&json!({
            "fetcherType": "http",
            "extraFlag": true,
        }));
        assert!(report.ok);
        assert_eq!(report.unknown_top_level_keys, vec!["extraFlag".to_string()]);
    }

    #[test]
    fn zero_rps_is_hard_failure_naming_the_key() {
        let report = validate_scrape_config(&json!({
            "rateLimit": {"requestsPerSecond": 0}
        }));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("requestsPerSecond")));
        assert!(report.config.is_none());
    }

    #[test]
    fn known_key_type_mismatch_is_hard_failure() {
        let report = validate_scrape_config(&json!({"fetcherType": 7}));
        assert!(!report.ok);

        let report = validate_scrape_config(&json!({"rateLimit": "fast"}));
        assert!(!report.ok);

        let report = validate_scrape_config(&json!({"customHeaders": {"Accept": 1}}));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("Accept")));

        let report = validate_scrape_config(&json!({"discovery": [1, 2]}));
        assert!(!report.ok);
    }

    #[test]
    fn unsupported_fetcher_type_rejected() {
        let report = validate_scrape_config(&json!({"fetcherType": "browser"}));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("http")));
    }

    #[test]
    fn non_object_document_rejected() {
        let report = validate_scrape_config(&json!([1, 2, 3]));
        assert!(!report.ok);
    }

    #[test]
    fn warnings_survive_alongside_hard_failure() {
        let report = validate_scrape_config(&json!({
            "mystery": 1,
            "rateLimit": {"requestsPerSecond": -2},
        }));
        assert!(!report.ok);
        assert_eq!(report.unknown_top_level_keys, vec!["mystery".to_string()]);
    }

    #[test]
    fn negative_min_delay_rejected() {
        let report = validate_scrape_config(&json!({
            "rateLimit": {"minDelayMs": -100}
        }));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("minDelayMs")));
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = validate_scrape_config(&json!({"surprise": 1}));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["unknownTopLevelKeys"], json!(["surprise"]));
        assert_eq!(json["ok"], json!(true));
    }
}
