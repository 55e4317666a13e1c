//! Sliding-window request rate limiting.
//!
//! Counters live in per-minute windows keyed
//! `ratelimit:<key>:<YYYY-MM-DD HH:MM>`. The shared-KV variant (feature
//! `redis-store`) relies on `INCR` plus a 2-minute expiry set on first
//! create; the in-memory variant keeps the same windows in a map and prunes
//! stale ones as it goes. Backend errors are surfaced to the caller, who
//! fails open.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::GatewayError;

/// Minute-window bucket format shared by both variants.
fn window_key(key: &str, minute: &str) -> String {
    format!("ratelimit:{key}:{minute}")
}

fn current_minute() -> String {
    Utc::now().format("%Y-%m-%d %H:%M").to_string()
}

/// Request rate-limiting contract.
#[async_trait]
pub trait RateLimitManager: Send + Sync {
    /// Count one request against `key` and report whether it is within
    /// `limit` requests for the current minute. A non-positive limit always
    /// allows.
    ///
    /// Backend errors return `Err`; callers treat that as allow-through.
    async fn allow(&self, key: &str, limit: u32) -> Result<bool, GatewayError>;
}

/// Single-process rate limiter over in-memory minute windows.
pub struct InMemoryRateLimitManager {
    windows: Mutex<HashMap<String, u64>>,
}

impl InMemoryRateLimitManager {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRateLimitManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitManager for InMemoryRateLimitManager {
    async fn allow(&self, key: &str, limit: u32) -> Result<bool, GatewayError> {
        if limit == 0 {
            return Ok(true);
        }

        let minute = current_minute();
        let bucket = window_key(key, &minute);

        let mut windows = self.windows.lock().expect("rate limit lock poisoned");
        // Stale windows expire as new minutes begin.
        windows.retain(|k, _| k.ends_with(&minute));

        let count = windows.entry(bucket).or_insert(0);
        *count += 1;

        if *count > limit as u64 {
            tracing::warn!(key, count = *count, limit, "rate limit exceeded");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(feature = "redis-store")]
pub use shared::RedisRateLimitManager;

#[cfg(feature = "redis-store")]
mod shared {
    use super::*;
    use redis::AsyncCommands;
    use tracing::{error, warn};

    const WINDOW_TTL_SECS: i64 = 120;

    /// Shared-KV rate limiter.
    pub struct RedisRateLimitManager {
        conn: redis::aio::ConnectionManager,
    }

    impl RedisRateLimitManager {
        pub fn new(conn: redis::aio::ConnectionManager) -> Self {
            Self { conn }
        }
    }

    #[async_trait]
    impl RateLimitManager for RedisRateLimitManager {
        async fn allow(&self, key: &str, limit: u32) -> Result<bool, GatewayError> {
            if limit == 0 {
                return Ok(true);
            }

            let bucket = window_key(key, &current_minute());
            let mut conn = self.conn.clone();

            let count: u64 = match conn.incr(&bucket, 1u64).await {
                Ok(count) => count,
                Err(err) => {
                    error!(key = %bucket, error = %err, "failed to increment rate limit counter");
                    return Err(GatewayError::Config(format!(
                        "rate limit backend error: {err}"
                    )));
                }
            };

            if count == 1 {
                let _: Result<(), _> = conn.expire(&bucket, WINDOW_TTL_SECS).await;
            }

            if count > limit as u64 {
                warn!(key, count, limit, "rate limit exceeded");
                return Ok(false);
            }
            Ok(true)
        }
    }
}
