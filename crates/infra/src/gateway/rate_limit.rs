//! Fixed-window request limits per `(endpoint, client)` pair.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::config::RateLimitConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("too many requests to {endpoint}; retry in {}s", retry_after.as_secs())]
pub struct RateLimited {
    pub endpoint: String,
    pub retry_after: Duration,
}

pub trait RateLimiter: Send + Sync {
    /// Count one request against the caller's window.
    fn hit(&self, endpoint: &str, client: &str) -> Result<(), RateLimited>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Process-local limiter; each `(endpoint, client)` gets its own window.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(String, String), Window>>,
}

impl FixedWindowRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn hit_at(&self, endpoint: &str, client: &str, now: Instant) -> Result<(), RateLimited> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Drop windows that can no longer limit anything.
        if windows.len() > 10_000 {
            let window = self.config.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let slot = windows
            .entry((endpoint.to_string(), client.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });
        if now.duration_since(slot.started) >= self.config.window {
            *slot = Window {
                started: now,
                count: 0,
            };
        }

        if slot.count >= self.config.max {
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(slot.started));
            warn!(endpoint, client, "rate limit exceeded");
            return Err(RateLimited {
                endpoint: endpoint.to_string(),
                retry_after,
            });
        }
        slot.count += 1;
        Ok(())
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn hit(&self, endpoint: &str, client: &str) -> Result<(), RateLimited> {
        self.hit_at(endpoint, client, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter(max: u32) -> FixedWindowRateLimiter {
        FixedWindowRateLimiter::new(RateLimitConfig {
            max,
            window: Duration::from_secs(60),
        })
    }

    #[test]
    fn eleventh_request_in_a_window_is_rejected() {
        let limiter = limiter(10);
        let t0 = Instant::now();
        for i in 0..10 {
            limiter
                .hit_at("status", "1.2.3.4", t0 + Duration::from_secs(i))
                .unwrap();
        }
        let err = limiter
            .hit_at("status", "1.2.3.4", t0 + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(err.endpoint, "status");
        assert_eq!(err.retry_after, Duration::from_secs(50));
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = limiter(1);
        let t0 = Instant::now();
        limiter.hit_at("status", "c", t0).unwrap();
        assert!(limiter.hit_at("status", "c", t0 + Duration::from_secs(59)).is_err());
        limiter
            .hit_at("status", "c", t0 + Duration::from_secs(60))
            .unwrap();
    }

    #[test]
    fn clients_and_endpoints_are_independent() {
        let limiter = limiter(1);
        let t0 = Instant::now();
        limiter.hit_at("status", "a", t0).unwrap();
        limiter.hit_at("status", "b", t0).unwrap();
        limiter.hit_at("notify", "a", t0).unwrap();
        assert!(limiter.hit_at("status", "a", t0).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn at_most_max_requests_pass_per_window(
            max in 1u32..20,
            offsets in proptest::collection::vec(0u64..60_000, 0..60),
        ) {
            let limiter = limiter(max);
            let t0 = Instant::now();
            let mut offsets = offsets;
            offsets.sort_unstable();

            let passed = offsets
                .iter()
                .filter(|ms| limiter.hit_at("status", "c", t0 + Duration::from_millis(**ms)).is_ok())
                .count();

            prop_assert_eq!(passed, offsets.len().min(max as usize));
        }
    }
}
