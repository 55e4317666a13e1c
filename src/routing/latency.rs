//! Latency tracking and the latency-based strategy.
//!
//! # Scoring
//!
//! One exponential moving average per provider:
//!
//! ```text
//! score = α·latest + (1-α)·prior,  α = 0.2
//! ```
//!
//! A score of 0 means "never measured". The router explores unmeasured
//! providers uniformly at random until every candidate has a score, then
//! exploits the minimum-EMA candidate. Candidates are shuffled before the
//! scan so equal scores break ties fairly over time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::GatewayError;
use crate::routing::{RouteStrategy, SelectInput, Selection};
use crate::traits::ChatProvider;

const DEFAULT_ALPHA: f64 = 0.2;

/// Thread-safe per-provider latency EMA.
pub struct LatencyTracker {
    alpha: f64,
    scores: Mutex<HashMap<String, f64>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_alpha(DEFAULT_ALPHA)
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha,
            scores: Mutex::new(HashMap::new()),
        }
    }

    /// Fold a new observation (milliseconds) into the provider's EMA.
    pub fn record(&self, provider: &str, latency_ms: f64) {
        let mut scores = self.scores.lock().expect("latency lock poisoned");
        let score = match scores.get(provider) {
            Some(prior) => self.alpha * latency_ms + (1.0 - self.alpha) * prior,
            None => latency_ms,
        };
        scores.insert(provider.to_string(), score);
    }

    /// Current EMA for the provider; 0 when never recorded.
    pub fn score(&self, provider: &str) -> f64 {
        self.scores
            .lock()
            .expect("latency lock poisoned")
            .get(provider)
            .copied()
            .unwrap_or(0.0)
    }

    /// Whether any observation exists for the provider.
    pub fn has_score(&self, provider: &str) -> bool {
        self.scores
            .lock()
            .expect("latency lock poisoned")
            .contains_key(provider)
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency-based strategy: explore unmeasured, exploit the fastest.
pub struct LatencyRouter {
    tracker: Arc<LatencyTracker>,
}

impl LatencyRouter {
    pub fn new(tracker: Arc<LatencyTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl RouteStrategy for LatencyRouter {
    fn name(&self) -> &'static str {
        "latency-based"
    }

    async fn select(&self, input: &SelectInput<'_>) -> Result<Selection, GatewayError> {
        let mut candidates: Vec<Arc<dyn ChatProvider>> = input
            .candidates
            .iter()
            .filter(|p| input.circuits.can_execute(p.name()))
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(GatewayError::NoHealthyProviders);
        }

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);

        let mut best: Option<(Arc<dyn ChatProvider>, f64)> = None;
        let mut unknown: Vec<Arc<dyn ChatProvider>> = Vec::new();

        for provider in &candidates {
            let score = self.tracker.score(provider.name());
            if score == 0.0 {
                unknown.push(provider.clone());
                continue;
            }
            match &best {
                Some((_, current)) if score >= *current => {}
                _ => best = Some((provider.clone(), score)),
            }
        }

        // Exploration: any unmeasured candidate takes priority so every
        // provider eventually earns a score.
        let provider = if !unknown.is_empty() {
            unknown[rng.gen_range(0..unknown.len())].clone()
        } else if let Some((provider, _)) = best {
            provider
        } else {
            candidates[0].clone()
        };

        Ok(Selection {
            provider,
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

    #[test]
    fn test_ema_single_observation() {
        let tracker = LatencyTracker::new();
        tracker.record("a", 100.0);
        assert_eq!(tracker.score("a"), 100.0);
    }

    #[test]
    fn test_ema_folding() {
        let tracker = LatencyTracker::with_alpha(0.2);
        tracker.record("a", 100.0);
        tracker.record("a", 200.0);
        // 0.2*200 + 0.8*100 = 120
        assert!((tracker.score("a") - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_unmeasured_score_zero() {
        let tracker = LatencyTracker::new();
        assert_eq!(tracker.score("never"), 0.0);
        assert!(!tracker.has_score("never"));
    }

    #[tokio::test]
    async fn test_explores_unknown_first() {
        let tracker = Arc::new(LatencyTracker::new());
        tracker.record("fast", 10.0);
        let router = LatencyRouter::new(tracker);

        let circuits = circuits(&["fast", "new"]);
        let input = SelectInput {
            candidates: providers(&["fast", "new"]),
            messages: &[],
            tier: None,
            circuits: &circuits,
        };

        // "new" has no score, so exploration must pick it every time.
        for _ in 0..10 {
            let selection = router.select(&input).await.unwrap();
            assert_eq!(selection.provider.name(), "new");
        }
    }

    #[tokio::test]
    async fn test_exploits_minimum_ema() {
        let tracker = Arc::new(LatencyTracker::new());
        tracker.record("slow", 900.0);
        tracker.record("fast", 30.0);
        tracker.record("medium", 300.0);
        let router = LatencyRouter::new(tracker);

        let circuits = circuits(&["slow", "fast", "medium"]);
        let input = SelectInput {
            candidates: providers(&["slow", "fast", "medium"]),
            messages: &[],
            tier: None,
            circuits: &circuits,
        };

        for _ in 0..20 {
            let selection = router.select(&input).await.unwrap();
            assert_eq!(selection.provider.name(), "fast");
        }
    }

    #[tokio::test]
    async fn test_skips_open_breakers() {
        let tracker = Arc::new(LatencyTracker::new());
        tracker.record("fast", 10.0);
        tracker.record("slow", 500.0);
        let router = LatencyRouter::new(tracker);

        let circuits = circuits(&["fast", "slow"]);
        let breaker = circuits.get("fast").unwrap();
        for _ in 0..5 {
            breaker.record(Some(&GatewayError::NoAvailable));
        }
        assert!(!breaker.can_execute());

        let input = SelectInput {
            candidates: providers(&["fast", "slow"]),
            messages: &[],
            tier: None,
            circuits: &circuits,
        };
        let selection = router.select(&input).await.unwrap();
        assert_eq!(selection.provider.name(), "slow");
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let router = LatencyRouter::new(Arc::new(LatencyTracker::new()));
        let circuits = circuits(&[]);
        let input = SelectInput {
            candidates: vec![],
            messages: &[],
            tier: None,
            circuits: &circuits,
        };
        assert!(matches!(
            router.select(&input).await.unwrap_err(),
            GatewayError::NoHealthyProviders
        ));
    }
}
