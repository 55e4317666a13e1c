//! Cost-based strategy.
//!
//! For each candidate the router estimates the request's token count via the
//! adapter's local tokenizer, enumerates the catalog models that satisfy the
//! tier constraint, prices each with the prompt estimate standing in for
//! both input and output tokens, and keeps the global minimum. The winning
//! selection binds both the provider and the model ID, which later drives
//! tier-aware fallback chains.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog::{ModelCatalog, ModelInfo, ModelTier};
use crate::config::CostOptions;
use crate::error::GatewayError;
use crate::routing::{RouteStrategy, SelectInput, Selection};
use crate::traits::ChatProvider;

/// Cheapest-model strategy.
pub struct CostRouter {
    catalog: Arc<ModelCatalog>,
    default_tier: Option<ModelTier>,
    minimum_tier: Option<ModelTier>,
}

impl CostRouter {
    pub fn new(catalog: Arc<ModelCatalog>, options: CostOptions) -> Result<Self, GatewayError> {
        let parse = |value: &Option<String>| -> Result<Option<ModelTier>, GatewayError> {
            value.as_deref().map(str::parse).transpose()
        };
        Ok(Self {
            catalog,
            default_tier: parse(&options.default_tier)?,
            minimum_tier: parse(&options.minimum_tier)?,
        })
    }

    /// Catalog models a candidate may serve under the active constraint.
    fn models_for(&self, provider: &str, tier_constraint: Option<ModelTier>) -> Vec<ModelInfo> {
        match (tier_constraint, self.minimum_tier) {
            (Some(tier), _) => self.catalog.list_by_provider_and_tier(provider, tier),
            (None, Some(minimum)) => self.catalog.models_at_or_above(provider, minimum),
            (None, None) => self.catalog.list_by_provider(provider),
        }
    }
}

#[async_trait]
impl RouteStrategy for CostRouter {
    fn name(&self) -> &'static str {
        "cost-based"
    }

    async fn select(&self, input: &SelectInput<'_>) -> Result<Selection, GatewayError> {
        let tier_constraint = input.tier.or(self.default_tier);

        let mut cheapest: Option<(Arc<dyn ChatProvider>, ModelInfo, f64)> = None;

        for provider in &input.candidates {
            let name = provider.name();

            if !input.circuits.can_execute(name) {
                debug!(provider = name, "skipping provider with open circuit");
                continue;
            }

            let tokens = match provider.count_tokens(input.messages).await {
                Ok(tokens) => tokens,
                Err(err) => {
                    warn!(provider = name, error = %err, "failed to count tokens for provider");
                    continue;
                }
            };

            let models = self.models_for(name, tier_constraint);
            if models.is_empty() {
                debug!(
                    provider = name,
                    tier = tier_constraint.map(|t| t.as_str()).unwrap_or("any"),
                    "no models for provider under tier constraint"
                );
                continue;
            }

            for model in models {
                // Output size is unknown before the call; the prompt
                // estimate stands in for both sides.
                let Ok(cost) = self.catalog.cost_for(&model.id, tokens, tokens) else {
                    continue;
                };
                match &cheapest {
                    Some((_, _, best)) if cost >= *best => {}
                    _ => cheapest = Some((provider.clone(), model, cost)),
                }
            }
        }

        let Some((provider, model, cost)) = cheapest else {
            return Err(match tier_constraint {
                Some(tier) => GatewayError::NoProvidersInTier(tier.as_str().to_string()),
                None => GatewayError::NoAvailable,
            });
        };

        info!(
            provider = provider.name(),
            model = %model.id,
            tier = model.tier.as_str(),
            requested_tier = tier_constraint.map(|t| t.as_str()).unwrap_or(""),
            estimated_cost_usd = cost,
            "cost-based router selected provider"
        );

        Ok(Selection {
            provider,
            model: Some(model.id),
            candidates: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::config::CircuitSettings;
    use crate::metrics::GatewayMetrics;
    use crate::providers::mock::MockProvider;
    use crate::resilience::circuit::CircuitBreakerSet;
    use crate::traits::ChatMessage;
    use std::collections::BTreeSet;

    fn model(id: &str, cost: f64, tier: ModelTier) -> ModelInfo {
        let (provider, _) = id.split_once('/').unwrap();
        ModelInfo {
            id: id.to_string(),
            provider: provider.to_string(),
            display_name: id.to_string(),
            input_cost_per_1m: cost,
            output_cost_per_1m: cost,
            context_window: 100_000,
            tier,
            capabilities: BTreeSet::new(),
        }
    }

    fn catalog() -> Arc<ModelCatalog> {
        Arc::new(ModelCatalog::from_entries(vec![
            model("a/pricey", 3.0, ModelTier::Premium),
            model("b/mid", 1.0, ModelTier::Premium),
            model("c/tiny", 0.1, ModelTier::Budget),
        ]))
    }

    fn providers(names: &[&str]) -> Vec<Arc<dyn crate::traits::ChatProvider>> {
        names
            .iter()
            .map(|n| Arc::new(MockProvider::new(*n)) as Arc<dyn crate::traits::ChatProvider>)
            .collect()
    }

    fn circuits(names: &[&str]) -> CircuitBreakerSet {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        CircuitBreakerSet::new(
            &names,
            CircuitSettings::default(),
            Arc::new(GatewayMetrics::new()),
        )
    }

    fn router(catalog: Arc<ModelCatalog>, options: CostOptions) -> CostRouter {
        CostRouter::new(catalog, options).unwrap()
    }

    #[tokio::test]
    async fn test_picks_global_cheapest_without_constraint() {
        let router = router(catalog(), CostOptions::default());
        let circuits = circuits(&["a", "b", "c"]);
        let messages = vec![ChatMessage::user("estimate me")];
        let input = SelectInput {
            candidates: providers(&["a", "b", "c"]),
            messages: &messages,
            tier: None,
            circuits: &circuits,
        };

        let selection = router.select(&input).await.unwrap();
        assert_eq!(selection.provider.name(), "c");
        assert_eq!(selection.model.as_deref(), Some("c/tiny"));
    }

    #[tokio::test]
    async fn test_tier_constraint_picks_cheapest_in_tier() {
        let router = router(catalog(), CostOptions::default());
        let circuits = circuits(&["a", "b", "c"]);
        let messages = vec![ChatMessage::user("premium please")];
        let input = SelectInput {
            candidates: providers(&["a", "b", "c"]),
            messages: &messages,
            tier: Some(ModelTier::Premium),
            circuits: &circuits,
        };

        let selection = router.select(&input).await.unwrap();
        assert_eq!(selection.provider.name(), "b");
        assert_eq!(selection.model.as_deref(), Some("b/mid"));
    }

    #[tokio::test]
    async fn test_empty_tier_fails_with_tier_error() {
        let router = router(catalog(), CostOptions::default());
        let circuits = circuits(&["a", "b", "c"]);
        let messages = vec![ChatMessage::user("hi")];
        let input = SelectInput {
            candidates: providers(&["a", "b", "c"]),
            messages: &messages,
            tier: Some(ModelTier::UltraPremium),
            circuits: &circuits,
        };

        match router.select(&input).await.unwrap_err() {
            GatewayError::NoProvidersInTier(tier) => assert_eq!(tier, "ultra-premium"),
            other => panic!("expected NoProvidersInTier, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_default_tier_applied_when_request_silent() {
        let options = CostOptions {
            default_tier: Some("premium".to_string()),
            minimum_tier: None,
        };
        let router = router(catalog(), options);
        let circuits = circuits(&["a", "b", "c"]);
        let messages = vec![ChatMessage::user("hi")];
        let input = SelectInput {
            candidates: providers(&["a", "b", "c"]),
            messages: &messages,
            tier: None,
            circuits: &circuits,
        };

        let selection = router.select(&input).await.unwrap();
        // Budget-tier c/tiny is excluded by the default premium constraint.
        assert_eq!(selection.model.as_deref(), Some("b/mid"));
    }

    #[tokio::test]
    async fn test_minimum_tier_floors_enumeration() {
        let options = CostOptions {
            default_tier: None,
            minimum_tier: Some("standard".to_string()),
        };
        let router = router(catalog(), options);
        let circuits = circuits(&["a", "b", "c"]);
        let messages = vec![ChatMessage::user("hi")];
        let input = SelectInput {
            candidates: providers(&["a", "b", "c"]),
            messages: &messages,
            tier: None,
            circuits: &circuits,
        };

        let selection = router.select(&input).await.unwrap();
        assert_eq!(selection.model.as_deref(), Some("b/mid"));
    }

    #[tokio::test]
    async fn test_open_breaker_skipped() {
        let router = router(catalog(), CostOptions::default());
        let circuits = circuits(&["a", "b", "c"]);
        let breaker = circuits.get("c").unwrap();
        for _ in 0..5 {
            breaker.record(Some(&GatewayError::NoAvailable));
        }

        let messages = vec![ChatMessage::user("hi")];
        let input = SelectInput {
            candidates: providers(&["a", "b", "c"]),
            messages: &messages,
            tier: None,
            circuits: &circuits,
        };
        let selection = router.select(&input).await.unwrap();
        assert_eq!(selection.provider.name(), "b");
    }

    #[test]
    fn test_invalid_tier_in_options_rejected() {
        let options = CostOptions {
            default_tier: Some("gold".to_string()),
            minimum_tier: None,
        };
        assert!(CostRouter::new(catalog(), options).is_err());
    }
}
