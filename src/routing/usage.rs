//! Daily rolled-up usage history.
//!
//! Each successful request records cost, token counts and a request
//! increment against both `usage:v1:<date>:<provider>` and
//! `usage:v1:<date>:global`. The shared-KV variant keeps hashes with a
//! 90-day TTL; the in-memory variant holds the same rolled-up shape keyed by
//! date. Nothing finer-grained than the daily aggregate is persisted.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Aggregate key covering all providers.
pub const GLOBAL_KEY: &str = "global";

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// One day's rolled-up counters for one provider (or the global key).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests: u64,
}

/// Usage-history contract.
#[async_trait]
pub trait UsageHistory: Send + Sync {
    /// Record one successful request against today's provider and global
    /// aggregates.
    async fn record(
        &self,
        provider: &str,
        cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<(), GatewayError>;

    /// All aggregates recorded for a `YYYY-MM-DD` date, keyed by provider
    /// name plus [`GLOBAL_KEY`].
    async fn daily(&self, date: &str) -> Result<HashMap<String, UsageStats>, GatewayError>;
}

/// Single-process usage history.
pub struct InMemoryUsageHistory {
    days: RwLock<HashMap<String, HashMap<String, UsageStats>>>,
}

impl InMemoryUsageHistory {
    pub fn new() -> Self {
        Self {
            days: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUsageHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageHistory for InMemoryUsageHistory {
    async fn record(
        &self,
        provider: &str,
        cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<(), GatewayError> {
        let date = today();
        let mut days = self.days.write().expect("usage lock poisoned");
        let day = days.entry(date).or_default();

        for key in [provider, GLOBAL_KEY] {
            let stats = day.entry(key.to_string()).or_default();
            stats.cost_usd += cost_usd;
            stats.input_tokens += input_tokens;
            stats.output_tokens += output_tokens;
            stats.requests += 1;
        }
        Ok(())
    }

    async fn daily(&self, date: &str) -> Result<HashMap<String, UsageStats>, GatewayError> {
        Ok(self
            .days
            .read()
            .expect("usage lock poisoned")
            .get(date)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(feature = "redis-store")]
pub use shared::RedisUsageHistory;

#[cfg(feature = "redis-store")]
mod shared {
    use super::*;
    use redis::AsyncCommands;
    use tracing::error;

    const RETENTION_SECS: i64 = 60 * 60 * 24 * 90;

    fn usage_key(date: &str, entity: &str) -> String {
        format!("usage:v1:{date}:{entity}")
    }

    /// Shared-KV usage history with 90-day retention.
    pub struct RedisUsageHistory {
        conn: redis::aio::ConnectionManager,
    }

    impl RedisUsageHistory {
        pub fn new(conn: redis::aio::ConnectionManager) -> Self {
            Self { conn }
        }
    }

    #[async_trait]
    impl UsageHistory for RedisUsageHistory {
        async fn record(
            &self,
            provider: &str,
            cost_usd: f64,
            input_tokens: u64,
            output_tokens: u64,
        ) -> Result<(), GatewayError> {
            let date = today();
            let mut conn = self.conn.clone();

            for entity in [provider, GLOBAL_KEY] {
                let key = usage_key(&date, entity);
                let result: Result<(), redis::RedisError> = redis::pipe()
                    .hincr(&key, "cost", cost_usd)
                    .ignore()
                    .hincr(&key, "input_tokens", input_tokens)
                    .ignore()
                    .hincr(&key, "output_tokens", output_tokens)
                    .ignore()
                    .hincr(&key, "requests", 1u64)
                    .ignore()
                    .expire(&key, RETENTION_SECS)
                    .ignore()
                    .query_async(&mut conn)
                    .await;

                if let Err(err) = result {
                    error!(key = %key, error = %err, "failed to record usage in redis");
                }
            }
            Ok(())
        }

        async fn daily(&self, date: &str) -> Result<HashMap<String, UsageStats>, GatewayError> {
            let mut conn = self.conn.clone();
            let pattern = usage_key(date, "*");
            let keys: Vec<String> = conn
                .keys(&pattern)
                .await
                .map_err(|e| GatewayError::Config(format!("usage history read failed: {e}")))?;

            let mut results = HashMap::new();
            for key in keys {
                let Ok(fields) = conn.hgetall::<_, HashMap<String, String>>(&key).await else {
                    continue;
                };
                let entity = key.rsplit(':').next().unwrap_or_default().to_string();
                let parse_u64 =
                    |name: &str| fields.get(name).and_then(|v| v.parse().ok()).unwrap_or(0);

                results.insert(
                    entity,
                    UsageStats {
                        cost_usd: fields
                            .get("cost")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0.0),
                        input_tokens: parse_u64("input_tokens"),
                        output_tokens: parse_u64("output_tokens"),
                        requests: parse_u64("requests"),
                    },
                );
            }
            Ok(results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_provider_and_global() {
        let history = InMemoryUsageHistory::new();
        history.record("openai", 0.25, 100, 40).await.unwrap();
        history.record("openai", 0.25, 50, 10).await.unwrap();
        history.record("gemini", 0.10, 30, 5).await.unwrap();

        let stats = history.daily(&today()).await.unwrap();

        let openai = stats["openai"];
        assert_eq!(openai.requests, 2);
        assert_eq!(openai.input_tokens, 150);
        assert_eq!(openai.output_tokens, 50);
        assert!((openai.cost_usd - 0.5).abs() < 1e-9);

        let global = stats[GLOBAL_KEY];
        assert_eq!(global.requests, 3);
        assert!((global.cost_usd - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_date_empty() {
        let history = InMemoryUsageHistory::new();
        let stats = history.daily("1999-01-01").await.unwrap();
        assert!(stats.is_empty());
    }
}
