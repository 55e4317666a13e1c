//! Per-provider request-per-minute filter.
//!
//! Providers without a configured limit pass through untouched. Backend
//! errors fail open: a broken limiter must not take the gateway down with
//! it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::GatewayError;
use crate::routing::filters::{FilterInput, ProviderFilter};
use crate::routing::rate_limit::RateLimitManager;
use crate::traits::ChatProvider;

/// Drops providers whose RPM window is exhausted this minute.
pub struct RateLimitFilter {
    manager: Arc<dyn RateLimitManager>,
    limits: HashMap<String, u32>,
}

impl RateLimitFilter {
    pub fn new(manager: Arc<dyn RateLimitManager>, limits: HashMap<String, u32>) -> Self {
        Self { manager, limits }
    }
}

#[async_trait]
impl ProviderFilter for RateLimitFilter {
    fn name(&self) -> &str {
        "ratelimit"
    }

    async fn filter(
        &self,
        input: FilterInput<'_>,
    ) -> Result<Vec<Arc<dyn ChatProvider>>, GatewayError> {
        let mut kept = Vec::with_capacity(input.candidates.len());

        for provider in input.candidates {
            let name = provider.name().to_string();
            let Some(limit) = self.limits.get(&name).copied().filter(|l| *l > 0) else {
                kept.push(provider);
                continue;
            };

            let key = format!("provider:{name}");
            match self.manager.allow(&key, limit).await {
                Ok(true) => kept.push(provider),
                Ok(false) => {
                    warn!(provider = %name, "provider rate limit reached, skipping");
                }
                Err(err) => {
                    error!(provider = %name, error = %err, "rate limit check failed, allowing anyway");
                    kept.push(provider);
                }
            }
        }

        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::routing::rate_limit::InMemoryRateLimitManager;

    fn candidates(names: &[&str]) -> Vec<Arc<dyn ChatProvider>> {
        names
            .iter()
            .map(|n| Arc::new(MockProvider::new(*n)) as Arc<dyn ChatProvider>)
            .collect()
    }

    fn filter(limits: &[(&str, u32)]) -> RateLimitFilter {
        RateLimitFilter::new(
            Arc::new(InMemoryRateLimitManager::new()),
            limits.iter().map(|(n, l)| (n.to_string(), *l)).collect(),
        )
    }

    #[tokio::test]
    async fn test_unlimited_provider_passes() {
        let filter = filter(&[]);
        for _ in 0..20 {
            let kept = filter
                .filter(FilterInput {
                    candidates: candidates(&["free"]),
                    messages: &[],
                    tier: None,
                })
                .await
                .unwrap();
            assert_eq!(kept.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_limit_boundary() {
        let filter = filter(&[("capped", 5)]);

        for i in 0..5 {
            let kept = filter
                .filter(FilterInput {
                    candidates: candidates(&["capped"]),
                    messages: &[],
                    tier: None,
                })
                .await
                .unwrap();
            assert_eq!(kept.len(), 1, "request {i} should pass");
        }

        // The sixth request within the minute filters the provider out.
        let kept = filter
            .filter(FilterInput {
                candidates: candidates(&["capped"]),
                messages: &[],
                tier: None,
            })
            .await
            .unwrap();
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn test_only_capped_provider_dropped() {
        let filter = filter(&[("capped", 1)]);
        let _ = filter
            .filter(FilterInput {
                candidates: candidates(&["capped"]),
                messages: &[],
                tier: None,
            })
            .await
            .unwrap();

        let kept = filter
            .filter(FilterInput {
                candidates: candidates(&["capped", "free"]),
                messages: &[],
                tier: None,
            })
            .await
            .unwrap();
        let names: Vec<&str> = kept.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["free"]);
    }

    struct BrokenLimiter;

    #[async_trait]
    impl RateLimitManager for BrokenLimiter {
        async fn allow(&self, _key: &str, _limit: u32) -> Result<bool, GatewayError> {
            Err(GatewayError::Config("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_error_fails_open() {
        let filter = RateLimitFilter::new(
            Arc::new(BrokenLimiter),
            [("a".to_string(), 1)].into_iter().collect(),
        );
        let kept = filter
            .filter(FilterInput {
                candidates: candidates(&["a"]),
                messages: &[],
                tier: None,
            })
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
    }
}
