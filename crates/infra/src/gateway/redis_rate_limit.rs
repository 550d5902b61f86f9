//! Shared fixed-window limiter for multi-instance deployments.

use redis::Commands;
use tracing::error;

use super::rate_limit::{RateLimited, RateLimiter};
use crate::config::RateLimitConfig;

/// `INCR rate_limit:{endpoint}:{client}`, with `EXPIRE` set on the first hit.
///
/// Redis faults fail open: the request is allowed and the fault is logged.
pub struct RedisRateLimiter {
    client: redis::Client,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    pub fn new(redis_url: &str, config: RateLimitConfig) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            config,
        })
    }

    fn count(&self, key: &str) -> Result<(u32, i64), redis::RedisError> {
        let mut conn = self.client.get_connection()?;
        let count: u32 = conn.incr(key, 1)?;
        if count == 1 {
            let _: () = conn.expire(key, self.config.window.as_secs() as i64)?;
        }
        let ttl: i64 = conn.ttl(key)?;
        Ok((count, ttl))
    }
}

impl RateLimiter for RedisRateLimiter {
    fn hit(&self, endpoint: &str, client: &str) -> Result<(), RateLimited> {
        let key = format!("rate_limit:{endpoint}:{client}");
        match self.count(&key) {
            Ok((count, _)) if count <= self.config.max => Ok(()),
            Ok((_, ttl)) => {
                tracing::warn!(endpoint, client, "rate limit exceeded");
                Err(RateLimited {
                    endpoint: endpoint.to_string(),
                    retry_after: std::time::Duration::from_secs(ttl.max(0) as u64),
                })
            }
            Err(e) => {
                error!(endpoint, error = %e, "rate limiter backend unavailable; allowing request");
                Ok(())
            }
        }
    }
}
