//! Politeness and safety gates applied to every outbound request.

mod fetch;
mod netguard;
mod ratelimit;
mod robots;

pub use fetch::{
    BLOCKED_BODY_MARKERS, DEFAULT_USER_AGENT, FetchError, FetchPolicyEngine, FetchResult,
    FetchStatus, FetcherConfig, HttpFetcher, PolicyRequest, RetryConfig, body_looks_blocked,
};
pub use netguard::{HostGuardError, ensure_public_host, is_private_or_reserved_host};
pub use ratelimit::{
    DomainPermit, DomainRateLimiter, RateLimitConfig, RateLimitOverride,
};
pub use robots::{
    DEFAULT_AGENT, HttpRobotsTransport, RobotsPolicy, RobotsRules, RobotsTransport, TransportError,
};
