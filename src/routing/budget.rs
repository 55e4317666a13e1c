//! Per-provider budget tracking and enforcement.
//!
//! Cumulative spend per provider is compared against configured limits. A
//! provider with no limit is always within budget. Tracking is atomic in
//! both variants: the in-memory manager serializes behind a write lock, the
//! shared-KV manager (feature `redis-store`) leans on `INCRBYFLOAT` keyed
//! `budget:total:<provider>` so multiple gateway instances share one
//! counter.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

/// Budget tracking contract.
#[async_trait]
pub trait BudgetManager: Send + Sync {
    /// Atomically add `cost_usd` to the provider's cumulative usage.
    ///
    /// Crossing the configured limit logs a warning; enforcement happens in
    /// the budget filter via [`within_budget`](Self::within_budget).
    async fn track(&self, provider: &str, cost_usd: f64);

    /// True while cumulative usage is strictly below the limit, or when no
    /// limit is configured.
    async fn within_budget(&self, provider: &str) -> bool;

    /// Current cumulative usage in USD.
    async fn usage(&self, provider: &str) -> f64;

    /// Reset the provider's cumulative usage to zero.
    async fn reset(&self, provider: &str);
}

/// Single-process budget manager.
pub struct InMemoryBudgetManager {
    usage: RwLock<HashMap<String, f64>>,
    limits: HashMap<String, f64>,
}

impl InMemoryBudgetManager {
    pub fn new(limits: HashMap<String, f64>) -> Self {
        Self {
            usage: RwLock::new(HashMap::new()),
            limits,
        }
    }
}

#[async_trait]
impl BudgetManager for InMemoryBudgetManager {
    async fn track(&self, provider: &str, cost_usd: f64) {
        let total = {
            let mut usage = self.usage.write().expect("budget lock poisoned");
            let entry = usage.entry(provider.to_string()).or_insert(0.0);
            *entry += cost_usd;
            *entry
        };

        if let Some(limit) = self.limits.get(provider) {
            if total >= *limit {
                warn!(
                    provider,
                    usage_usd = total,
                    limit_usd = limit,
                    "provider has exceeded budget limit"
                );
            }
        }
    }

    async fn within_budget(&self, provider: &str) -> bool {
        let Some(limit) = self.limits.get(provider) else {
            return true;
        };
        let usage = self.usage.read().expect("budget lock poisoned");
        usage.get(provider).copied().unwrap_or(0.0) < *limit
    }

    async fn usage(&self, provider: &str) -> f64 {
        self.usage
            .read()
            .expect("budget lock poisoned")
            .get(provider)
            .copied()
            .unwrap_or(0.0)
    }

    async fn reset(&self, provider: &str) {
        self.usage
            .write()
            .expect("budget lock poisoned")
            .remove(provider);
    }
}

#[cfg(feature = "redis-store")]
pub use shared::RedisBudgetManager;

#[cfg(feature = "redis-store")]
mod shared {
    use super::*;
    use redis::AsyncCommands;
    use tracing::error;

    fn budget_key(provider: &str) -> String {
        format!("budget:total:{provider}")
    }

    /// Shared-KV budget manager; multiple gateway instances accumulate into
    /// the same counters.
    pub struct RedisBudgetManager {
        conn: redis::aio::ConnectionManager,
        limits: HashMap<String, f64>,
    }

    impl RedisBudgetManager {
        pub fn new(conn: redis::aio::ConnectionManager, limits: HashMap<String, f64>) -> Self {
            Self { conn, limits }
        }
    }

    #[async_trait]
    impl BudgetManager for RedisBudgetManager {
        async fn track(&self, provider: &str, cost_usd: f64) {
            let mut conn = self.conn.clone();
            let total: f64 = match conn.incr(budget_key(provider), cost_usd).await {
                Ok(total) => total,
                Err(err) => {
                    error!(provider, error = %err, "failed to track usage in redis");
                    return;
                }
            };

            if let Some(limit) = self.limits.get(provider) {
                if total >= *limit {
                    warn!(
                        provider,
                        usage_usd = total,
                        limit_usd = limit,
                        "provider has exceeded budget limit"
                    );
                }
            }
        }

        async fn within_budget(&self, provider: &str) -> bool {
            let Some(limit) = self.limits.get(provider) else {
                return true;
            };
            self.usage(provider).await < *limit
        }

        async fn usage(&self, provider: &str) -> f64 {
            let mut conn = self.conn.clone();
            match conn.get::<_, Option<f64>>(budget_key(provider)).await {
                Ok(value) => value.unwrap_or(0.0),
                Err(err) => {
                    error!(provider, error = %err, "failed to read usage from redis");
                    0.0
                }
            }
        }

        async fn reset(&self, provider: &str) {
            let mut conn = self.conn.clone();
            if let Err(err) = conn.del::<_, ()>(budget_key(provider)).await {
                error!(provider, error = %err, "failed to reset usage in redis");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limits(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_track_accumulates() {
        let manager = InMemoryBudgetManager::new(HashMap::new());
        manager.track("openai", 0.5).await;
        manager.track("openai", 0.25).await;
        assert!((manager.usage("openai").await - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_limit_always_within() {
        let manager = InMemoryBudgetManager::new(HashMap::new());
        manager.track("openai", 1_000_000.0).await;
        assert!(manager.within_budget("openai").await);
    }

    #[tokio::test]
    async fn test_limit_enforced_at_boundary() {
        let manager = InMemoryBudgetManager::new(limits(&[("openai", 1.0)]));
        manager.track("openai", 0.99).await;
        assert!(manager.within_budget("openai").await);

        // Reaching the limit exactly is out of budget.
        manager.track("openai", 0.01).await;
        assert!(!manager.within_budget("openai").await);
    }

    #[tokio::test]
    async fn test_reset() {
        let manager = InMemoryBudgetManager::new(limits(&[("openai", 1.0)]));
        manager.track("openai", 5.0).await;
        assert!(!manager.within_budget("openai").await);

        manager.reset("openai").await;
        assert_eq!(manager.usage("openai").await, 0.0);
        assert!(manager.within_budget("openai").await);
    }

    #[tokio::test]
    async fn test_unknown_provider_usage_zero() {
        let manager = InMemoryBudgetManager::new(HashMap::new());
        assert_eq!(manager.usage("nobody").await, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_tracking_sums_exactly() {
        let manager = Arc::new(InMemoryBudgetManager::new(HashMap::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    manager.track("openai", 0.01).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!((manager.usage("openai").await - 8.0).abs() < 1e-6);
    }
}
