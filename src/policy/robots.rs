//! robots.txt fetch, cache, and fail-closed evaluation.
//!
//! Rules are cached per registrable domain for 24 hours and replaced
//! wholesale on refresh. A robots.txt that cannot be fetched (non-404 HTTP
//! failure or network error, after retries) marks the whole domain
//! disallowed until the cache entry expires — unreachable robots means no
//! fetching, not free rein.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::urlnorm::registrable_domain;

/// Robots user-agent token requests are matched against.
pub const DEFAULT_AGENT: &str = "IronScout";

/// Cache lifetime of a domain's rules.
pub const ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const FETCH_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(1000);
const MIN_CRAWL_DELAY_SECS: u64 = 1;
const MAX_CRAWL_DELAY_SECS: u64 = 60;
const DEFAULT_CRAWL_DELAY_SECS: u64 = 2;
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Network-level failure reported by a [`RobotsTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("robots transport: {0}")]
pub struct TransportError(pub String);

/// One GET of a robots.txt URL. Seam between the policy and the HTTP stack
/// so tests can inject canned responses and failures.
#[async_trait]
pub trait RobotsTransport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<(u16, String), TransportError>;
}

/// Production transport over a shared reqwest client.
pub struct HttpRobotsTransport {
    client: reqwest::Client,
}

impl HttpRobotsTransport {
    pub fn new(client: reqwest::Client) -> Self {
        HttpRobotsTransport { client }
    }
}

#[async_trait]
impl RobotsTransport for HttpRobotsTransport {
    async fn get(&self, url: &Url) -> Result<(u16, String), TransportError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        let mut body = response
            .text()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        if body.len() > MAX_ROBOTS_BYTES {
            body.truncate(MAX_ROBOTS_BYTES);
        }
        Ok((status, body))
    }
}

/// Parsed rules for one registrable domain.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsRules {
    /// `Disallow` patterns from the `User-agent: *` group.
    pub global_disallowed: Vec<String>,
    /// `Disallow` patterns from a group matching our agent token. `Some`
    /// when such a group exists — even an empty one, which means the agent
    /// is explicitly unrestricted and the `*` group does not apply.
    pub agent_disallowed: Option<Vec<String>>,
    /// Crawl delay in seconds as stated, before clamping.
    pub crawl_delay: Option<f64>,
    pub cached_at: DateTime<Utc>,
    /// False when the robots fetch failed; evaluation then disallows
    /// everything until the entry expires.
    pub fetch_succeeded: bool,
}

impl RobotsRules {
    pub fn allow_all(cached_at: DateTime<Utc>) -> Self {
        RobotsRules {
            global_disallowed: Vec::new(),
            agent_disallowed: None,
            crawl_delay: None,
            cached_at,
            fetch_succeeded: true,
        }
    }

    pub fn deny_all(cached_at: DateTime<Utc>) -> Self {
        RobotsRules {
            global_disallowed: Vec::new(),
            agent_disallowed: None,
            crawl_delay: None,
            cached_at,
            fetch_succeeded: false,
        }
    }

    /// Parses a robots.txt body for one agent token.
    ///
    /// Consecutive `User-agent:` lines form one group; the first rule line
    /// closes the agent list. A group naming our token takes priority over
    /// the `*` group and suppresses it entirely. Comments and unknown
    /// directives are skipped.
    pub fn parse(body: &str, agent: &str, cached_at: DateTime<Utc>) -> Self {
        struct Group {
            agents: Vec<String>,
            disallow: Vec<String>,
            crawl_delay: Option<f64>,
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;
        let mut last_was_agent = false;

        for raw_line in body.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if last_was_agent {
                        if let Some(group) = current.as_mut() {
                            group.agents.push(value.to_ascii_lowercase());
                        }
                    } else {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(Group {
                            agents: vec![value.to_ascii_lowercase()],
                            disallow: Vec::new(),
                            crawl_delay: None,
                        });
                    }
                    last_was_agent = true;
                }
                "disallow" => {
                    last_was_agent = false;
                    if let Some(group) = current.as_mut() {
                        if !value.is_empty() {
                            group.disallow.push(value.to_string());
                        }
                    }
                }
                "crawl-delay" => {
                    last_was_agent = false;
                    if let Some(group) = current.as_mut() {
                        if let Ok(seconds) = value.parse::<f64>() {
                            group.crawl_delay = Some(seconds);
                        }
                    }
                }
                _ => {
                    last_was_agent = false;
                }
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        let agent_token = agent.to_ascii_lowercase();
        let mut global_disallowed = Vec::new();
        let mut global_delay = None;
        let mut agent_disallowed: Option<Vec<String>> = None;
        let mut agent_delay = None;

        for group in groups {
            if group.agents.iter().any(|a| a == &agent_token) {
                agent_disallowed
                    .get_or_insert_with(Vec::new)
                    .extend(group.disallow.iter().cloned());
                if agent_delay.is_none() {
                    agent_delay = group.crawl_delay;
                }
            }
            if group.agents.iter().any(|a| a == "*") {
                global_disallowed.extend(group.disallow);
                if global_delay.is_none() {
                    global_delay = group.crawl_delay;
                }
            }
        }

        let crawl_delay = if agent_disallowed.is_some() {
            agent_delay
        } else {
            global_delay
        };

        RobotsRules {
            global_disallowed,
            agent_disallowed,
            crawl_delay,
            cached_at,
            fetch_succeeded: true,
        }
    }

    /// Whether the URL's path+query is fetchable under these rules.
    pub fn is_allowed(&self, url: &Url) -> bool {
        if !self.fetch_succeeded {
            return false;
        }
        let target = request_target(url);
        let rules = self
            .agent_disallowed
            .as_deref()
            .unwrap_or(&self.global_disallowed);
        !rules.iter().any(|pattern| path_matches(pattern, &target))
    }

    /// Crawl delay in whole seconds, clamped to `[1, 60]`, defaulting to 2.
    pub fn crawl_delay_secs(&self) -> u64 {
        match self.crawl_delay {
            Some(raw) if raw.is_finite() => {
                raw.clamp(MIN_CRAWL_DELAY_SECS as f64, MAX_CRAWL_DELAY_SECS as f64).round() as u64
            }
            _ => DEFAULT_CRAWL_DELAY_SECS,
        }
    }

    fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.cached_at).to_std() {
            Ok(age) => age < ttl,
            // cached_at in the future: clock skew, treat as fresh
            Err(_) => true,
        }
    }
}

/// Prefix match on path+query, with a trailing `*` wildcard. `/` and `*`
/// block everything.
fn path_matches(pattern: &str, target: &str) -> bool {
    if pattern == "/" || pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => target.starts_with(prefix),
        None => target.starts_with(pattern),
    }
}

fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Per-domain robots cache with fail-closed evaluation.
pub struct RobotsPolicy {
    agent: String,
    ttl: Duration,
    cache: DashMap<String, RobotsRules>,
    transport: Arc<dyn RobotsTransport>,
}

impl RobotsPolicy {
    pub fn new(transport: Arc<dyn RobotsTransport>) -> Self {
        RobotsPolicy {
            agent: DEFAULT_AGENT.to_string(),
            ttl: ROBOTS_TTL,
            cache: DashMap::new(),
            transport,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Whether this URL may be fetched. Fetch failures evaluate to `false`
    /// for every path on the domain (fail closed).
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let domain = registrable_domain(url);
        self.rules_for(&domain).await.is_allowed(url)
    }

    /// Clamped crawl delay for a domain, in seconds.
    pub async fn crawl_delay(&self, domain: &str) -> u64 {
        self.rules_for(domain).await.crawl_delay_secs()
    }

    async fn rules_for(&self, domain: &str) -> RobotsRules {
        if let Some(entry) = self.cache.get(domain) {
            if entry.is_fresh(self.ttl, Utc::now()) {
                return entry.clone();
            }
        }
        let rules = self.fetch_rules(domain).await;
        self.cache.insert(domain.to_string(), rules.clone());
        rules
    }

    async fn fetch_rules(&self, domain: &str) -> RobotsRules {
        let robots_url = match Url::parse(&format!("https://{domain}/robots.txt")) {
            Ok(url) => url,
            Err(err) => {
                warn!(domain, error = %err, "robots_url_unbuildable");
                return RobotsRules::deny_all(Utc::now());
            }
        };

        for attempt in 1..=FETCH_ATTEMPTS {
            match self.transport.get(&robots_url).await {
                Ok((404, _)) => {
                    debug!(domain, "robots_absent_allow_all");
                    return RobotsRules::allow_all(Utc::now());
                }
                Ok((status, body)) if (200..300).contains(&status) => {
                    debug!(domain, status, "robots_fetched");
                    return RobotsRules::parse(&body, &self.agent, Utc::now());
                }
                Ok((status, _)) => {
                    warn!(domain, status, attempt, "robots_fetch_http_error");
                }
                Err(err) => {
                    warn!(domain, attempt, error = %err, "robots_fetch_failed");
                }
            }
            if attempt < FETCH_ATTEMPTS {
                tokio::time::sleep(RETRY_BASE * attempt).await;
            }
        }

        warn!(domain, "robots_fail_closed");
        RobotsRules::deny_all(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn wildcard_group_applies_without_agent_group() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /admin\nDisallow: /cart\n",
            DEFAULT_AGENT,
            Utc::now(),
        );
        assert!(!rules.is_allowed(&url("https://x.com/admin/users")));
        assert!(!rules.is_allowed(&url("https://x.com/cart")));
        assert!(rules.is_allowed(&url("https://x.com/ammo/9mm")));
    }

    #[test]
    fn agent_group_overrides_wildcard() {
        let body = "User-agent: *\nDisallow: /\n\nUser-agent: IronScout\nDisallow: /checkout\n";
        let rules = RobotsRules::parse(body, DEFAULT_AGENT, Utc::now());
        assert!(rules.is_allowed(&url("https://x.com/ammo")));
        assert!(!rules.is_allowed(&url("https://x.com/checkout/step1")));
    }

    #[test]
    fn empty_agent_group_means_unrestricted() {
        let body = "User-agent: *\nDisallow: /\n\nUser-agent: IronScout\nDisallow:\n";
        let rules = RobotsRules::parse(body, DEFAULT_AGENT, Utc::now());
        assert_eq!(rules.agent_disallowed, Some(vec![]));
        assert!(rules.is_allowed(&url("https://x.com/anything")));
    }

    #[test]
    fn consecutive_agent_lines_form_one_group() {
        let body = "User-agent: IronScout\nUser-agent: OtherBot\nDisallow: /private\n";
        let rules = RobotsRules::parse(body, DEFAULT_AGENT, Utc::now());
        assert_eq!(rules.agent_disallowed, Some(vec!["/private".to_string()]));
        assert!(!rules.is_allowed(&url("https://x.com/private/a")));
    }

    #[test]
    fn agent_match_is_case_insensitive() {
        let body = "User-agent: ironscout\nDisallow: /x\n";
        let rules = RobotsRules::parse(body, DEFAULT_AGENT, Utc::now());
        assert!(rules.agent_disallowed.is_some());
    }

    #[test]
    fn trailing_wildcard_and_query_matching() {
        let body = "User-agent: *\nDisallow: /search?*\nDisallow: /tmp*\n";
        let rules = RobotsRules::parse(body, DEFAULT_AGENT, Utc::now());
        assert!(!rules.is_allowed(&url("https://x.com/search?q=9mm")));
        assert!(!rules.is_allowed(&url("https://x.com/tmp-files")));
        assert!(rules.is_allowed(&url("https://x.com/search"))); // no query, no `?`
        assert!(rules.is_allowed(&url("https://x.com/ammo")));
    }

    #[test]
    fn slash_or_star_blocks_domain() {
        for pattern in ["/", "*"] {
            let body = format!("User-agent: *\nDisallow: {pattern}\n");
            let rules = RobotsRules::parse(&body, DEFAULT_AGENT, Utc::now());
            assert!(!rules.is_allowed(&url("https://x.com/")));
            assert!(!rules.is_allowed(&url("https://x.com/anything/else")));
        }
    }

    #[test]
    fn comments_and_unknown_directives_skipped() {
        let body = "# politeness file\nUser-agent: * # all\nAllow: /open\nSitemap: https://x.com/s.xml\nDisallow: /closed # note\n";
        let rules = RobotsRules::parse(body, DEFAULT_AGENT, Utc::now());
        assert_eq!(rules.global_disallowed, vec!["/closed".to_string()]);
    }

    #[test]
    fn crawl_delay_clamped_and_defaulted() {
        let fast = RobotsRules::parse("User-agent: *\nCrawl-delay: 0.2\n", DEFAULT_AGENT, Utc::now());
        assert_eq!(fast.crawl_delay_secs(), 1);

        let slow = RobotsRules::parse("User-agent: *\nCrawl-delay: 600\n", DEFAULT_AGENT, Utc::now());
        assert_eq!(slow.crawl_delay_secs(), 60);

        let plain = RobotsRules::parse("User-agent: *\nCrawl-delay: 5\n", DEFAULT_AGENT, Utc::now());
        assert_eq!(plain.crawl_delay_secs(), 5);

        let unset = RobotsRules::parse("User-agent: *\nDisallow: /a\n", DEFAULT_AGENT, Utc::now());
        assert_eq!(unset.crawl_delay_secs(), 2);
    }

    #[test]
    fn agent_crawl_delay_preferred() {
        let body = "User-agent: *\nCrawl-delay: 30\n\nUser-agent: IronScout\nCrawl-delay: 4\n";
        let rules = RobotsRules::parse(body, DEFAULT_AGENT, Utc::now());
        assert_eq!(rules.crawl_delay_secs(), 4);
    }

    struct Canned {
        outcomes: Vec<Result<(u16, String), TransportError>>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(outcomes: Vec<Result<(u16, String), TransportError>>) -> Arc<Self> {
            Arc::new(Canned { outcomes, calls: AtomicUsize::new(0) })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RobotsTransport for Canned {
        async fn get(&self, _url: &Url) -> Result<(u16, String), TransportError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .get(index.min(self.outcomes.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_else(|| Err(TransportError("no canned outcome".into())))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_fails_closed_for_all_paths() {
        let transport = Canned::new(vec![Err(TransportError("connection refused".into()))]);
        let policy = RobotsPolicy::new(transport.clone());

        assert!(!policy.is_allowed(&url("https://shop.example.com/ammo")).await);
        assert!(!policy.is_allowed(&url("https://shop.example.com/")).await);
        // three attempts for the first evaluation, then served from cache
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn http_500_fails_closed_after_retries() {
        let transport = Canned::new(vec![Ok((500, String::new()))]);
        let policy = RobotsPolicy::new(transport.clone());
        assert!(!policy.is_allowed(&url("https://shop.example.com/a")).await);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn http_404_allows_everything_without_retry() {
        let transport = Canned::new(vec![Ok((404, String::new()))]);
        let policy = RobotsPolicy::new(transport.clone());
        assert!(policy.is_allowed(&url("https://shop.example.com/anything")).await);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn rules_cached_per_registrable_domain() {
        let transport = Canned::new(vec![Ok((200, "User-agent: *\nDisallow: /admin\n".into()))]);
        let policy = RobotsPolicy::new(transport.clone());

        assert!(policy.is_allowed(&url("https://www.example.com/a")).await);
        assert!(policy.is_allowed(&url("https://shop.example.com/b")).await);
        assert!(!policy.is_allowed(&url("https://example.com/admin")).await);
        // one fetch serves every subdomain of the registrable domain
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_refetches_and_can_recover() {
        let transport = Canned::new(vec![
            Err(TransportError("timeout".into())),
            Err(TransportError("timeout".into())),
            Err(TransportError("timeout".into())),
            Ok((404, String::new())),
        ]);
        // zero TTL: every cached entry is already expired on next lookup
        let policy = RobotsPolicy::new(transport.clone()).with_ttl(Duration::ZERO);

        assert!(!policy.is_allowed(&url("https://example.com/a")).await);
        assert!(policy.is_allowed(&url("https://example.com/a")).await);
        assert_eq!(transport.call_count(), 4);
    }
}
