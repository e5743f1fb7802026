//! Per-domain request pacing.
//!
//! Every registrable domain gets one gate holding a concurrency semaphore
//! and the timestamp of the next free send slot. Plugin overrides are
//! clamped so no site can configure itself faster than the global ceiling;
//! they can only slow themselves down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

/// Defaults applied when a plugin does not override a field.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 0.5;
pub const DEFAULT_MIN_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_CONCURRENT: u32 = 1;

/// Hard ceilings no override can exceed.
pub const MAX_REQUESTS_PER_SECOND: f64 = 2.0;
pub const FLOOR_MIN_DELAY_MS: u64 = 500;
pub const CEILING_MAX_CONCURRENT: u32 = 1;

/// Pacing overrides a plugin manifest may carry. All fields optional;
/// omitted fields fall back to the defaults, present fields are clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitOverride {
    pub requests_per_second: Option<f64>,
    pub min_delay_ms: Option<u64>,
    pub max_concurrent: Option<u32>,
}

/// Effective pacing for one domain, after defaults and clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub min_delay_ms: u64,
    pub max_concurrent: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl RateLimitConfig {
    /// Resolves an optional override into effective pacing. Each field is
    /// handled on its own: absent means default, present means clamped
    /// toward the conservative side.
    pub fn clamped_from(overrides: Option<&RateLimitOverride>) -> Self {
        let Some(overrides) = overrides else {
            return RateLimitConfig::default();
        };
        let requests_per_second = match overrides.requests_per_second {
            Some(rps) if rps.is_finite() && rps > 0.0 => rps.min(MAX_REQUESTS_PER_SECOND),
            Some(_) => DEFAULT_REQUESTS_PER_SECOND,
            None => DEFAULT_REQUESTS_PER_SECOND,
        };
        let min_delay_ms = match overrides.min_delay_ms {
            Some(ms) => ms.max(FLOOR_MIN_DELAY_MS),
            None => DEFAULT_MIN_DELAY_MS,
        };
        let max_concurrent = match overrides.max_concurrent {
            Some(n) if n >= 1 => n.min(CEILING_MAX_CONCURRENT),
            Some(_) => DEFAULT_MAX_CONCURRENT,
            None => DEFAULT_MAX_CONCURRENT,
        };
        RateLimitConfig { requests_per_second, min_delay_ms, max_concurrent }
    }

    /// Gap enforced between consecutive sends: the slower of the rps
    /// interval and the minimum delay.
    pub fn interval(&self) -> Duration {
        let from_rps = if self.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.requests_per_second)
        } else {
            Duration::ZERO
        };
        from_rps.max(Duration::from_millis(self.min_delay_ms))
    }

    /// Widens the inter-request gap to honor a robots crawl delay. Only
    /// ever slows a domain down.
    pub fn with_crawl_delay_secs(mut self, seconds: u64) -> Self {
        self.min_delay_ms = self.min_delay_ms.max(seconds * 1000);
        self
    }
}

struct DomainGate {
    config: Mutex<RateLimitConfig>,
    semaphore: Arc<Semaphore>,
    next_slot: Mutex<Option<Instant>>,
}

impl DomainGate {
    fn new(config: RateLimitConfig) -> Self {
        DomainGate {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config: Mutex::new(config),
            next_slot: Mutex::new(None),
        }
    }
}

/// Held for the lifetime of one in-flight request; dropping it frees the
/// domain's concurrency slot.
pub struct DomainPermit {
    _permit: OwnedSemaphorePermit,
}

/// Paces requests per registrable domain.
#[derive(Default)]
pub struct DomainRateLimiter {
    gates: DashMap<String, Arc<DomainGate>>,
}

impl DomainRateLimiter {
    pub fn new() -> Self {
        DomainRateLimiter::default()
    }

    /// Installs the effective config for a domain. Later `acquire` calls
    /// pace with it; the concurrency width is fixed at first sight of the
    /// domain (the ceiling is 1, so every config agrees).
    pub fn set_config(&self, domain: &str, config: RateLimitConfig) {
        let gate = self
            .gates
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainGate::new(config)))
            .clone();
        *gate.config.lock().unwrap() = config;
    }

    /// Waits for the domain's next send slot and claims its concurrency
    /// permit. Returns once the caller may put the request on the wire.
    pub async fn acquire(&self, domain: &str) -> DomainPermit {
        let gate = self
            .gates
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainGate::new(RateLimitConfig::default())))
            .clone();

        let permit = gate.semaphore.clone().acquire_owned().await.unwrap();

        let start = {
            let interval = gate.config.lock().unwrap().interval();
            let mut next_slot = gate.next_slot.lock().unwrap();
            let now = Instant::now();
            let start = match *next_slot {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next_slot = Some(start + interval);
            start
        };

        let wait = start.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            trace!(domain, wait_ms = wait.as_millis() as u64, "rate_limit_wait");
            tokio::time::sleep_until(start).await;
        }
        DomainPermit { _permit: permit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_override_uses_defaults() {
        let config = RateLimitConfig::clamped_from(None);
        assert_eq!(config, RateLimitConfig::default());
        assert_eq!(config.requests_per_second, 0.5);
        assert_eq!(config.min_delay_ms, 500);
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn excessive_overrides_clamp_to_ceilings() {
        let overrides = RateLimitOverride {
            requests_per_second: Some(50.0),
            min_delay_ms: Some(10),
            max_concurrent: Some(8),
        };
        let config = RateLimitConfig::clamped_from(Some(&overrides));
        assert_eq!(config.requests_per_second, 2.0);
        assert_eq!(config.min_delay_ms, 500);
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn conservative_overrides_pass_through() {
        let overrides = RateLimitOverride {
            requests_per_second: Some(0.25),
            min_delay_ms: Some(3000),
            max_concurrent: Some(1),
        };
        let config = RateLimitConfig::clamped_from(Some(&overrides));
        assert_eq!(config.requests_per_second, 0.25);
        assert_eq!(config.min_delay_ms, 3000);
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn nonsense_values_fall_back_to_defaults() {
        let overrides = RateLimitOverride {
            requests_per_second: Some(-1.0),
            min_delay_ms: None,
            max_concurrent: Some(0),
        };
        let config = RateLimitConfig::clamped_from(Some(&overrides));
        assert_eq!(config.requests_per_second, 0.5);
        assert_eq!(config.min_delay_ms, 500);
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn interval_is_slower_of_rps_and_min_delay() {
        let config = RateLimitConfig {
            requests_per_second: 2.0,
            min_delay_ms: 500,
            max_concurrent: 1,
        };
        assert_eq!(config.interval(), Duration::from_millis(500));

        let slow = RateLimitConfig {
            requests_per_second: 0.25,
            min_delay_ms: 500,
            max_concurrent: 1,
        };
        assert_eq!(slow.interval(), Duration::from_secs(4));
    }

    #[test]
    fn crawl_delay_only_widens_gap() {
        let config = RateLimitConfig::default().with_crawl_delay_secs(3);
        assert_eq!(config.min_delay_ms, 3000);

        let already_slow = RateLimitConfig {
            requests_per_second: 0.5,
            min_delay_ms: 10_000,
            max_concurrent: 1,
        };
        assert_eq!(already_slow.with_crawl_delay_secs(3).min_delay_ms, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn acquisitions_are_spaced_by_interval() {
        let limiter = DomainRateLimiter::new();
        limiter.set_config(
            "example.com",
            RateLimitConfig {
                requests_per_second: 1.0,
                min_delay_ms: 1000,
                max_concurrent: 1,
            },
        );

        let start = Instant::now();
        drop(limiter.acquire("example.com").await);
        drop(limiter.acquire("example.com").await);
        drop(limiter.acquire("example.com").await);
        let elapsed = start.elapsed();

        // first slot immediate, next two wait one interval each
        assert!(elapsed >= Duration::from_millis(2000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2500), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn domains_are_paced_independently() {
        let limiter = DomainRateLimiter::new();
        let start = Instant::now();
        drop(limiter.acquire("a.com").await);
        drop(limiter.acquire("b.com").await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_capped_at_one_permit() {
        let limiter = Arc::new(DomainRateLimiter::new());
        let first = limiter.acquire("example.com").await;

        let limiter2 = limiter.clone();
        let second = tokio::spawn(async move { limiter2.acquire("example.com").await });
        // the spawned acquire cannot finish while the first permit lives
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!second.is_finished());

        drop(first);
        let _ = second.await.unwrap();
    }
}
