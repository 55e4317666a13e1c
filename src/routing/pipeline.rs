//! The routing pipeline: breaker pruning, ordered filters, strategy pick.

use std::sync::Arc;

use tracing::debug;

use crate::catalog::ModelTier;
use crate::error::GatewayError;
use crate::providers::manager::ProviderManager;
use crate::resilience::circuit::CircuitBreakerSet;
use crate::routing::filters::{FilterInput, ProviderFilter};
use crate::routing::{RouteStrategy, SelectInput, Selection};
use crate::traits::{ChatMessage, ChatProvider};

/// Filter pipeline wrapped around a base strategy.
pub struct PipelineRouter {
    strategy: Arc<dyn RouteStrategy>,
    manager: Arc<ProviderManager>,
    filters: Vec<Arc<dyn ProviderFilter>>,
}

impl PipelineRouter {
    pub fn new(strategy: Arc<dyn RouteStrategy>, manager: Arc<ProviderManager>) -> Self {
        Self {
            strategy,
            manager,
            filters: Vec::new(),
        }
    }

    /// Append a filter; filters run in registration order.
    pub fn add_filter(&mut self, filter: Arc<dyn ProviderFilter>) {
        self.filters.push(filter);
    }

    /// Name of the wrapped strategy, for the admin surface.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    /// Reduce the live provider set and delegate the final pick.
    pub async fn select(
        &self,
        messages: &[ChatMessage],
        tier: Option<ModelTier>,
        circuits: &CircuitBreakerSet,
    ) -> Result<Selection, GatewayError> {
        let all = self.manager.all();
        if all.is_empty() {
            return Err(GatewayError::NoProviders);
        }

        let mut candidates: Vec<Arc<dyn ChatProvider>> = all
            .into_iter()
            .filter(|p| circuits.can_execute(p.name()))
            .collect();
        if candidates.is_empty() {
            return Err(GatewayError::NoHealthyProviders);
        }

        for filter in &self.filters {
            candidates = filter
                .filter(FilterInput {
                    candidates,
                    messages,
                    tier,
                })
                .await?;
            debug!(
                filter = filter.name(),
                remaining = candidates.len(),
                "filter applied"
            );
            if candidates.is_empty() {
                return Err(GatewayError::FilteredEmpty(filter.name().to_string()));
            }
        }

        let candidate_names: Vec<String> =
            candidates.iter().map(|p| p.name().to_string()).collect();

        let input = SelectInput {
            candidates,
            messages,
            tier,
            circuits,
        };
        let mut selection = self.strategy.select(&input).await?;
        selection.candidates = candidate_names;
        Ok(selection)
    }
}
