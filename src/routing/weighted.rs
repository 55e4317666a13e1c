//! Weighted-random strategy.
//!
//! Candidates with a positive configured weight and an executable breaker
//! enter the draw. A uniform integer in `[0, Σw)` walks the cumulative
//! prefix; the first candidate whose running sum strictly exceeds the draw
//! wins, so selection probability is proportional to weight.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::error::GatewayError;
use crate::routing::{RouteStrategy, SelectInput, Selection};
use crate::traits::ChatProvider;

/// Weighted-random over the candidate set.
pub struct WeightedRouter {
    weights: HashMap<String, u32>,
}

impl WeightedRouter {
    pub fn new(weights: HashMap<String, u32>) -> Result<Self, GatewayError> {
        if weights.is_empty() {
            return Err(GatewayError::Config(
                "weighted router requires at least one weight definition".to_string(),
            ));
        }
        Ok(Self { weights })
    }
}

#[async_trait]
impl RouteStrategy for WeightedRouter {
    fn name(&self) -> &'static str {
        "weighted"
    }

    async fn select(&self, input: &SelectInput<'_>) -> Result<Selection, GatewayError> {
        let candidates: Vec<Arc<dyn ChatProvider>> = input
            .candidates
            .iter()
            .filter(|p| {
                self.weights.get(p.name()).copied().unwrap_or(0) > 0
                    && input.circuits.can_execute(p.name())
            })
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(GatewayError::NoAvailable);
        }

        let total: u64 = candidates
            .iter()
            .map(|p| self.weights[p.name()] as u64)
            .sum();
        if total == 0 {
            return Err(GatewayError::NoAvailable);
        }

        let target = rand::thread_rng().gen_range(0..total);
        let mut running = 0u64;
        for provider in &candidates {
            running += self.weights[provider.name()] as u64;
            if running > target {
                return Ok(Selection {
                    provider: provider.clone(),
                    model: None,
                    candidates: Vec::new(),
                });
            }
        }

        // Unreachable given running sums to total > target, but keep the
        // last candidate as a safe terminal.
        Ok(Selection {
            provider: candidates[candidates.len() - 1].clone(),
            model: None,
            candidates: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitSettings;
    use crate::metrics::GatewayMetrics;
    use crate::providers::mock::MockProvider;
    use crate::resilience::circuit::CircuitBreakerSet;

    fn providers(names: &[&str]) -> Vec<Arc<dyn ChatProvider>> {
        names
            .iter()
            .map(|n| Arc::new(MockProvider::new(*n)) as Arc<dyn ChatProvider>)
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

    fn weights(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(n, w)| (n.to_string(), *w)).collect()
    }

    #[test]
    fn test_empty_weights_rejected() {
        assert!(WeightedRouter::new(HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_distribution_respects_weights() {
        let router = WeightedRouter::new(weights(&[("a", 10), ("b", 90), ("c", 0)])).unwrap();
        let circuits = circuits(&["a", "b", "c"]);
        let input = SelectInput {
            candidates: providers(&["a", "b", "c"]),
            messages: &[],
            tier: None,
            circuits: &circuits,
        };

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..1000 {
            let name = router.select(&input).await.unwrap().provider.name().to_string();
            *counts.entry(name).or_default() += 1;
        }

        // Zero-weight candidates never win; a's share lands near 10%.
        assert_eq!(counts.get("c"), None);
        let a = *counts.get("a").unwrap_or(&0);
        assert!((50..=150).contains(&a), "a selected {a} times out of 1000");
        assert_eq!(a + counts["b"], 1000);
    }

    #[tokio::test]
    async fn test_unweighted_candidates_dropped() {
        let router = WeightedRouter::new(weights(&[("a", 5)])).unwrap();
        let circuits = circuits(&["a", "unlisted"]);
        let input = SelectInput {
            candidates: providers(&["a", "unlisted"]),
            messages: &[],
            tier: None,
            circuits: &circuits,
        };
        for _ in 0..10 {
            assert_eq!(router.select(&input).await.unwrap().provider.name(), "a");
        }
    }

    #[tokio::test]
    async fn test_all_zero_weight_fails() {
        let router = WeightedRouter::new(weights(&[("a", 0), ("b", 0)])).unwrap();
        let circuits = circuits(&["a", "b"]);
        let input = SelectInput {
            candidates: providers(&["a", "b"]),
            messages: &[],
            tier: None,
            circuits: &circuits,
        };
        assert!(matches!(
            router.select(&input).await.unwrap_err(),
            GatewayError::NoAvailable
        ));
    }

    #[tokio::test]
    async fn test_tripped_breaker_dropped() {
        let router = WeightedRouter::new(weights(&[("a", 50), ("b", 50)])).unwrap();
        let circuits = circuits(&["a", "b"]);
        let breaker = circuits.get("a").unwrap();
        for _ in 0..5 {
            breaker.record(Some(&GatewayError::NoAvailable));
        }

        let input = SelectInput {
            candidates: providers(&["a", "b"]),
            messages: &[],
            tier: None,
            circuits: &circuits,
        };
        for _ in 0..10 {
            assert_eq!(router.select(&input).await.unwrap().provider.name(), "b");
        }
    }
}
