//! Outbound HTTP: the retrying fetcher and the policy-checked entry point.
//!
//! [`HttpFetcher`] owns the reqwest client, enforces the body-size ceiling
//! while streaming, retries transient status codes, and classifies
//! bot-wall responses. [`FetchPolicyEngine::fetch_with_policy`] is the one
//! boundary the rest of the crate calls: host allow-list, private-address
//! guard, robots evaluation, and domain pacing all happen there, in that
//! order, before a byte goes on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::plugin::PluginMode;
use crate::policy::netguard::ensure_public_host;
use crate::policy::ratelimit::{DomainRateLimiter, RateLimitConfig, RateLimitOverride};
use crate::policy::robots::{HttpRobotsTransport, RobotsPolicy};
use crate::urlnorm::registrable_domain;

/// User agent sent on every request. Matching the robots token, with a
/// contact URL, per crawler etiquette.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; IronScout/1.0; +https://ironscout.app/bot)";

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const JSON_ACCEPT: &str = "application/json";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Substrings (lowercase) that mark a response body as a bot wall rather
/// than content. Shared by the fetcher's 403/503 classifier and by HTML
/// adapters that receive a challenge page with a 200 status.
pub const BLOCKED_BODY_MARKERS: &[&str] = &[
    "captcha",
    "cloudflare",
    "access denied",
    "request blocked",
    "bot detection",
    "unusual traffic",
    "are you a robot",
    "challenge-platform",
    "perimeterx",
    "datadome",
    "incapsula",
    "just a moment",
];

/// Marker scan against the default list.
pub fn body_looks_blocked(body: &str) -> bool {
    let lowered = body.to_lowercase();
    BLOCKED_BODY_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Terminal classification of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// 2xx response with a body under the size ceiling.
    Ok,
    /// Non-2xx response or transport failure, retries exhausted.
    Error,
    /// Deadline elapsed before the response completed.
    Timeout,
    /// Body exceeded the size ceiling; download abandoned mid-stream.
    TooLarge,
    /// 403/503 whose body looks like a bot wall. Never retried in-process.
    Blocked,
    /// robots.txt (or its absence after a failed fetch) forbids the URL.
    RobotsBlocked,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::Error => "error",
            FetchStatus::Timeout => "timeout",
            FetchStatus::TooLarge => "too_large",
            FetchStatus::Blocked => "blocked",
            FetchStatus::RobotsBlocked => "robots_blocked",
        }
    }
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one fetch through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Response body, present only on `Ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Hex SHA-256 of the body, for change detection across runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchResult {
    pub fn ok(status_code: u16, body: String, duration_ms: u64) -> Self {
        let content_hash = hex::encode(Sha256::digest(body.as_bytes()));
        FetchResult {
            status: FetchStatus::Ok,
            status_code: Some(status_code),
            body: Some(body),
            content_hash: Some(content_hash),
            duration_ms,
            error: None,
        }
    }

    pub fn failed(
        status: FetchStatus,
        status_code: Option<u16>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        FetchResult {
            status,
            status_code,
            body: None,
            content_hash: None,
            duration_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }
}

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Status codes worth retrying. Everything else fails on first sight.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
            retry_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Delay before the given attempt (1-based): exponential from the
    /// initial delay, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((raw as u64).min(self.max_delay_ms))
    }

    pub fn is_retryable(&self, status_code: u16) -> bool {
        self.retry_statuses.contains(&status_code)
    }
}

/// Fetcher tuning. Serde-loadable so deployments can override defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Streaming ceiling; bodies past this abort as `too_large`.
    pub max_body_bytes: usize,
    pub max_redirects: usize,
    pub retry: RetryConfig,
    /// Lowercase substrings that mark a 403/503 body as a bot wall.
    pub blocked_markers: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
            max_body_bytes: 4 * 1024 * 1024,
            max_redirects: 5,
            retry: RetryConfig::default(),
            blocked_markers: BLOCKED_BODY_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl FetcherConfig {
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.user_agent.trim().is_empty() {
            return Err(FetchError::Config("user_agent must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(FetchError::Config("timeout_ms must be greater than zero".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(FetchError::Config("max_body_bytes must be greater than zero".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(FetchError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build http client: {0}")]
    ClientBuild(#[from] reqwest::Error),
    #[error("invalid fetcher config: {0}")]
    Config(String),
}

/// Retrying, size-capped HTTP fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .gzip(true)
            .build()?;
        Ok(HttpFetcher { client, config })
    }

    pub(crate) fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetches one URL, retrying transient statuses per the retry schedule.
    /// Transport failures that carry no status code (reset, refused, a
    /// connection dropped mid-read) retry on the same schedule; a timeout
    /// is terminal for the whole call, not the attempt.
    /// Custom headers never replace the user agent.
    pub async fn fetch(
        &self,
        url: &Url,
        mode: PluginMode,
        custom_headers: Option<&HashMap<String, String>>,
        timeout_ms: Option<u64>,
    ) -> FetchResult {
        let started = Instant::now();
        let deadline = Duration::from_millis(timeout_ms.unwrap_or(self.config.timeout_ms));
        let mut last_error = String::new();
        let mut last_status = None;

        for attempt in 1..=self.config.retry.max_attempts {
            if attempt > 1 {
                // delay keyed to the attempt that just failed
                let delay = self.config.retry.retry_delay(attempt - 1);
                debug!(%url, attempt, delay_ms = delay.as_millis() as u64, "fetch_retry");
                tokio::time::sleep(delay).await;
            }

            let accept = match mode {
                PluginMode::Html => HTML_ACCEPT,
                PluginMode::Json => JSON_ACCEPT,
            };
            let mut request = self
                .client
                .get(url.as_str())
                .header("Accept", accept)
                .header("Accept-Language", ACCEPT_LANGUAGE);
            if let Some(headers) = custom_headers {
                for (name, value) in headers {
                    if name.eq_ignore_ascii_case("user-agent") {
                        continue;
                    }
                    request = request.header(name.as_str(), value.as_str());
                }
            }

            match tokio::time::timeout(deadline, self.execute(request)).await {
                Err(_) => {
                    return FetchResult::failed(
                        FetchStatus::Timeout,
                        None,
                        format!("deadline of {}ms elapsed", deadline.as_millis()),
                        elapsed_ms(started),
                    );
                }
                Ok(Err(err)) if err.is_timeout() => {
                    return FetchResult::failed(
                        FetchStatus::Timeout,
                        None,
                        err.to_string(),
                        elapsed_ms(started),
                    );
                }
                Ok(Err(err)) => {
                    last_error = err.to_string();
                    last_status = None;
                    warn!(%url, attempt, error = %last_error, "fetch_transport_error");
                    continue;
                }
                Ok(Ok(AttemptOutcome::TooLarge { limit })) => {
                    return FetchResult::failed(
                        FetchStatus::TooLarge,
                        None,
                        format!("body exceeded {limit} bytes"),
                        elapsed_ms(started),
                    );
                }
                Ok(Ok(AttemptOutcome::Response { status_code, body })) => {
                    if (200..300).contains(&status_code) {
                        return FetchResult::ok(status_code, body, elapsed_ms(started));
                    }
                    if matches!(status_code, 403 | 503) && self.looks_blocked(&body) {
                        return FetchResult::failed(
                            FetchStatus::Blocked,
                            Some(status_code),
                            format!("bot wall detected on http {status_code}"),
                            elapsed_ms(started),
                        );
                    }
                    last_error = format!("http status {status_code}");
                    last_status = Some(status_code);
                    if !self.config.retry.is_retryable(status_code) {
                        break;
                    }
                    debug!(%url, status_code, attempt, "fetch_status_retryable");
                }
            }
        }

        FetchResult::failed(FetchStatus::Error, last_status, last_error, elapsed_ms(started))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> reqwest::Result<AttemptOutcome> {
        let mut response = request.send().await?;
        let status_code = response.status().as_u16();
        let limit = self.config.max_body_bytes;

        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Ok(AttemptOutcome::TooLarge { limit });
            }
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if buffer.len() + chunk.len() > limit {
                return Ok(AttemptOutcome::TooLarge { limit });
            }
            buffer.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&buffer).into_owned();
        Ok(AttemptOutcome::Response { status_code, body })
    }

    /// Whether a response body carries a known bot-wall marker.
    pub(crate) fn looks_blocked(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.config
            .blocked_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }
}

enum AttemptOutcome {
    Response { status_code: u16, body: String },
    TooLarge { limit: usize },
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// One request through the policy boundary.
pub struct PolicyRequest<'a> {
    pub url: &'a str,
    pub mode: PluginMode,
    /// Hosts the caller is allowed to touch; anything else is refused.
    pub base_urls: &'a [Url],
    pub rate_limit: Option<&'a RateLimitOverride>,
    pub headers: Option<&'a HashMap<String, String>>,
    pub timeout_ms: Option<u64>,
}

/// Robots evaluation, pacing, and the fetcher as one checked entry point.
pub struct FetchPolicyEngine {
    robots: RobotsPolicy,
    limiter: DomainRateLimiter,
    fetcher: HttpFetcher,
}

impl FetchPolicyEngine {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(config)?;
        let robots = RobotsPolicy::new(Arc::new(HttpRobotsTransport::new(fetcher.client())));
        Ok(FetchPolicyEngine { robots, limiter: DomainRateLimiter::new(), fetcher })
    }

    /// Assembles an engine from pre-built parts. Tests use this to inject
    /// a canned robots transport.
    pub fn from_parts(robots: RobotsPolicy, limiter: DomainRateLimiter, fetcher: HttpFetcher) -> Self {
        FetchPolicyEngine { robots, limiter, fetcher }
    }

    pub fn robots(&self) -> &RobotsPolicy {
        &self.robots
    }

    /// Fetches a URL with every gate applied. Never touches the network
    /// for URLs outside the allow-list, resolving to private addresses,
    /// or forbidden by robots.
    pub async fn fetch_with_policy(&self, request: PolicyRequest<'_>) -> FetchResult {
        let started = Instant::now();

        let url = match Url::parse(request.url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                return FetchResult::failed(
                    FetchStatus::Error,
                    None,
                    format!("unsupported scheme {:?}", url.scheme()),
                    0,
                );
            }
            Err(err) => {
                return FetchResult::failed(FetchStatus::Error, None, err.to_string(), 0);
            }
        };

        let Some(host) = url.host_str() else {
            return FetchResult::failed(FetchStatus::Error, None, "url has no host", 0);
        };
        let host_allowed = request
            .base_urls
            .iter()
            .filter_map(|base| base.host_str())
            .any(|base_host| base_host.eq_ignore_ascii_case(host));
        if !host_allowed {
            warn!(%url, host, "fetch_refused_host_not_allowed");
            return FetchResult::failed(
                FetchStatus::Error,
                None,
                format!("host {host:?} is not among the plugin's base urls"),
                0,
            );
        }

        if let Err(err) = ensure_public_host(host).await {
            warn!(%url, error = %err, "fetch_refused_private_address");
            return FetchResult::failed(FetchStatus::Error, None, err.to_string(), 0);
        }

        if !self.robots.is_allowed(&url).await {
            info!(%url, "fetch_refused_by_robots");
            return FetchResult::failed(
                FetchStatus::RobotsBlocked,
                None,
                "robots.txt disallows this url",
                elapsed_ms(started),
            );
        }

        let domain = registrable_domain(&url);
        let crawl_delay = self.robots.crawl_delay(&domain).await;
        let config =
            RateLimitConfig::clamped_from(request.rate_limit).with_crawl_delay_secs(crawl_delay);
        self.limiter.set_config(&domain, config);

        // permit held across the fetch so concurrency covers the wire time
        let _permit = self.limiter.acquire(&domain).await;
        let mut result = self
            .fetcher
            .fetch(&url, request.mode, request.headers, request.timeout_ms)
            .await;
        result.duration_ms = elapsed_ms(started);

        info!(
            %url,
            status = %result.status,
            status_code = result.status_code,
            duration_ms = result.duration_ms,
            "fetch_complete"
        );
        result
    }
}
