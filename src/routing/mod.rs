//! Provider selection: strategies, filters and the routing pipeline.
//!
//! A request flows through [`pipeline::PipelineRouter`]: the provider
//! manager's live set is pruned of open breakers, reduced by the ordered
//! filter chain (budget → rate limit → semantic), then handed to one of the
//! four strategies for the final pick.

pub mod budget;
pub mod cost;
pub mod filters;
pub mod latency;
pub mod pipeline;
pub mod rate_limit;
pub mod round_robin;
pub mod usage;
pub mod weighted;

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{ModelCatalog, ModelTier};
use crate::config::RoutingConfig;
use crate::error::GatewayError;
use crate::providers::manager::ProviderManager;
use crate::resilience::circuit::CircuitBreakerSet;
use crate::traits::{ChatMessage, ChatProvider};

pub use budget::{BudgetManager, InMemoryBudgetManager};
pub use latency::{LatencyRouter, LatencyTracker};
pub use pipeline::PipelineRouter;
pub use rate_limit::{InMemoryRateLimitManager, RateLimitManager};
pub use usage::{InMemoryUsageHistory, UsageHistory, UsageStats};

// ============================================================================
// Selection contract
// ============================================================================

/// Everything a strategy may consult while picking a provider.
pub struct SelectInput<'a> {
    /// Candidate set, already reduced by the filter pipeline.
    pub candidates: Vec<Arc<dyn ChatProvider>>,

    /// The request's conversation, for token counting and intent matching.
    pub messages: &'a [ChatMessage],

    /// Requested quality tier, when the caller constrained one.
    pub tier: Option<ModelTier>,

    /// The breaker set, for defense-in-depth health checks.
    pub circuits: &'a CircuitBreakerSet,
}

/// The routing decision.
pub struct Selection {
    /// The chosen provider adapter.
    pub provider: Arc<dyn ChatProvider>,

    /// Registry model ID bound by the strategy (cost-based only).
    pub model: Option<String>,

    /// Names of the post-filter candidates the pick was made from.
    pub candidates: Vec<String>,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("candidates", &self.candidates)
            .finish()
    }
}

/// A provider-selection strategy.
#[async_trait]
pub trait RouteStrategy: Send + Sync {
    /// Short strategy label for logs and the admin surface.
    fn name(&self) -> &'static str;

    /// Pick one provider (and optionally a model) from the candidates.
    async fn select(&self, input: &SelectInput<'_>) -> Result<Selection, GatewayError>;
}

// ============================================================================
// Strategy wiring
// ============================================================================

/// Build the configured strategy and wrap it in the filter pipeline.
///
/// Returns the pipeline router plus the configured fallback provider names.
pub fn configure_strategy(
    routing: &RoutingConfig,
    manager: Arc<ProviderManager>,
    catalog: Arc<ModelCatalog>,
    tracker: Arc<LatencyTracker>,
    budget: Arc<dyn BudgetManager>,
    rate_limits: std::collections::HashMap<String, u32>,
    rate_limiter: Arc<dyn RateLimitManager>,
) -> Result<(PipelineRouter, Vec<String>), GatewayError> {
    let strategy: Arc<dyn RouteStrategy> = match routing.strategy.as_str() {
        "round-robin" => Arc::new(round_robin::RoundRobinRouter::new()),
        "cost-based" => Arc::new(cost::CostRouter::new(
            catalog.clone(),
            routing.cost.clone().unwrap_or_default(),
        )?),
        "latency-based" => Arc::new(LatencyRouter::new(tracker)),
        "weighted" => Arc::new(weighted::WeightedRouter::new(routing.weights.clone())?),
        other => {
            return Err(GatewayError::Config(format!(
                "unsupported routing strategy: {other} \
                 (supported: round-robin, cost-based, latency-based, weighted)"
            )))
        }
    };

    let mut pipeline = PipelineRouter::new(strategy, manager);

    pipeline.add_filter(Arc::new(filters::budget::BudgetFilter::new(budget)));
    tracing::info!("enabled budget filter in routing pipeline");

    if !rate_limits.is_empty() {
        pipeline.add_filter(Arc::new(filters::rate_limit::RateLimitFilter::new(
            rate_limiter,
            rate_limits,
        )));
        tracing::info!("enabled rate limit filter in routing pipeline");
    }

    if let Some(policy) = &routing.semantic {
        if policy.enabled {
            let semantic = filters::build_semantic_filter(policy, catalog);
            tracing::info!(filter = semantic.name(), "enabled semantic filter in routing pipeline");
            pipeline.add_filter(semantic);
        }
    }

    Ok((pipeline, routing.fallbacks.clone()))
}
