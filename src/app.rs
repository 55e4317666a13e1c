//! Application bundle assembly and tenant resolution.
//!
//! [`App`] wires every component from a validated config: catalog, provider
//! manager (latency-decorated adapters), breaker set, strategy pipeline and
//! the fallback executor. The bundle is immutable after build.
//!
//! [`TenantResolver`] is the indirection the request path goes through to
//! reach the active bundle. The single-tenant resolver holds one bundle
//! behind an atomically replaceable pointer, so a config reload publishes a
//! whole new `App` without blocking in-flight readers; a multi-tenant
//! deployment would implement the same trait keyed by request credential.

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::catalog::ModelCatalog;
use crate::chain::FallbackExecutor;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::providers::factory::ProviderFactory;
use crate::providers::manager::ProviderManager;
use crate::resilience::circuit::CircuitBreakerSet;
use crate::resilience::retry::RetryExecutor;
use crate::routing::budget::{BudgetManager, InMemoryBudgetManager};
use crate::routing::latency::LatencyTracker;
use crate::routing::rate_limit::{InMemoryRateLimitManager, RateLimitManager};
use crate::routing::usage::{InMemoryUsageHistory, UsageHistory};
use crate::routing::{configure_strategy, PipelineRouter};

/// One fully wired gateway instance.
pub struct App {
    pub config: GatewayConfig,
    pub catalog: Arc<ModelCatalog>,
    pub manager: Arc<ProviderManager>,
    pub router: PipelineRouter,
    pub fallbacks: Vec<String>,
    pub circuits: Arc<CircuitBreakerSet>,
    pub executor: FallbackExecutor,
    pub budget: Arc<dyn BudgetManager>,
    pub history: Arc<dyn UsageHistory>,
    pub tracker: Arc<LatencyTracker>,
    pub metrics: Arc<GatewayMetrics>,
}

impl App {
    /// Build a bundle from a validated config.
    pub async fn build(
        config: GatewayConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Arc<Self>, GatewayError> {
        let catalog = Arc::new(ModelCatalog::new(config.models.catalog.clone()));
        let tracker = Arc::new(LatencyTracker::new());

        let settings = config.enabled_providers();
        if settings.is_empty() {
            return Err(GatewayError::Config(
                "no enabled providers found in config".to_string(),
            ));
        }

        let factory =
            ProviderFactory::new(catalog.clone()).with_latency_tracker(tracker.clone());
        let manager = Arc::new(ProviderManager::new(factory.create_all(&settings))?);

        let (budget, rate_limiter, history) = build_stores(&config).await?;

        let circuits = Arc::new(CircuitBreakerSet::new(
            &manager.names(),
            config.resilience.circuit_breaker,
            metrics.clone(),
        ));

        let (router, fallbacks) = configure_strategy(
            &config.routing,
            manager.clone(),
            catalog.clone(),
            tracker.clone(),
            budget.clone(),
            config.rate_limits(),
            rate_limiter,
        )?;

        let retry =
            RetryExecutor::new(config.resilience.retry).with_metrics(metrics.clone());
        let executor = FallbackExecutor::new(
            retry,
            circuits.clone(),
            budget.clone(),
            history.clone(),
            metrics.clone(),
        );

        info!(
            strategy = router.strategy_name(),
            providers = manager.count(),
            fallbacks = fallbacks.len(),
            "application bundle assembled"
        );

        Ok(Arc::new(Self {
            config,
            catalog,
            manager,
            router,
            fallbacks,
            circuits,
            executor,
            budget,
            history,
            tracker,
            metrics,
        }))
    }
}

/// Pick the budget / rate-limit / usage-history backends.
///
/// With the `redis-store` feature and a `[redis]` section, all three share
/// one connection manager; otherwise everything stays in-process.
async fn build_stores(
    config: &GatewayConfig,
) -> Result<
    (
        Arc<dyn BudgetManager>,
        Arc<dyn RateLimitManager>,
        Arc<dyn UsageHistory>,
    ),
    GatewayError,
> {
    #[cfg(feature = "redis-store")]
    if let Some(redis_config) = &config.redis {
        let client = redis::Client::open(redis_config.url.as_str())
            .map_err(|e| GatewayError::Config(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| GatewayError::Config(format!("redis connection failed: {e}")))?;
        info!("shared KV stores enabled (redis)");
        return Ok((
            Arc::new(crate::routing::budget::RedisBudgetManager::new(
                conn.clone(),
                config.budget_limits(),
            )),
            Arc::new(crate::routing::rate_limit::RedisRateLimitManager::new(
                conn.clone(),
            )),
            Arc::new(crate::routing::usage::RedisUsageHistory::new(conn)),
        ));
    }

    #[cfg(not(feature = "redis-store"))]
    if config.redis.is_some() {
        tracing::warn!(
            "redis configured but the redis-store feature is disabled; using in-memory stores"
        );
    }

    Ok((
        Arc::new(InMemoryBudgetManager::new(config.budget_limits())),
        Arc::new(InMemoryRateLimitManager::new()),
        Arc::new(InMemoryUsageHistory::new()),
    ))
}

// ============================================================================
// Tenant resolution
// ============================================================================

/// Indirection from a request to the active bundle.
pub trait TenantResolver: Send + Sync {
    /// The bundle serving the current request.
    fn resolve(&self) -> Arc<App>;
}

/// Single-tenant resolver: one bundle, atomically swappable.
pub struct SingleTenantResolver {
    app: RwLock<Arc<App>>,
}

impl SingleTenantResolver {
    pub fn new(app: Arc<App>) -> Self {
        Self {
            app: RwLock::new(app),
        }
    }

    /// Publish a replacement bundle. In-flight requests keep the bundle
    /// they already resolved.
    pub fn replace(&self, app: Arc<App>) {
        *self.app.write().expect("resolver lock poisoned") = app;
    }

    /// Rebuild from the config file and publish atomically.
    pub async fn reload(&self) -> Result<(), GatewayError> {
        let metrics = self.resolve().metrics.clone();
        let config = GatewayConfig::load()?;
        let app = App::build(config, metrics).await?;
        self.replace(app);
        info!("configuration reloaded");
        Ok(())
    }
}

impl TenantResolver for SingleTenantResolver {
    fn resolve(&self) -> Arc<App> {
        self.app.read().expect("resolver lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GatewayConfig {
        GatewayConfig::from_toml(
            r#"
            [[providers]]
            name = "openai"
            api_key = "sk-test"
            enabled = true

            [[providers]]
            name = "anthropic"
            api_key = "ak-test"
            enabled = true

            [models.defaults.openai]
            model = "openai/gpt-4o-mini"

            [models.defaults.anthropic]
            model = "anthropic/claude-haiku-3"

            [routing]
            strategy = "round-robin"
            fallbacks = ["anthropic"]
        "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_wires_components() {
        let app = App::build(test_config(), Arc::new(GatewayMetrics::new()))
            .await
            .unwrap();
        assert_eq!(app.manager.count(), 2);
        assert_eq!(app.circuits.len(), 2);
        assert_eq!(app.fallbacks, vec!["anthropic"]);
        assert_eq!(app.router.strategy_name(), "round-robin");
    }

    #[tokio::test]
    async fn test_build_fails_without_enabled_providers() {
        let config = GatewayConfig::from_toml(
            r#"
            [[providers]]
            name = "openai"
            api_key = "sk"
            enabled = false
        "#,
        )
        .unwrap();
        assert!(App::build(config, Arc::new(GatewayMetrics::new()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_resolver_swap() {
        let metrics = Arc::new(GatewayMetrics::new());
        let first = App::build(test_config(), metrics.clone()).await.unwrap();
        let resolver = SingleTenantResolver::new(first.clone());

        let held = resolver.resolve();
        assert!(Arc::ptr_eq(&held, &first));

        let second = App::build(test_config(), metrics).await.unwrap();
        resolver.replace(second.clone());

        // The old reference stays valid; new resolutions see the new bundle.
        assert_eq!(held.manager.count(), 2);
        assert!(Arc::ptr_eq(&resolver.resolve(), &second));
    }
}
