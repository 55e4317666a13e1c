//! Per-provider circuit breakers.
//!
//! One breaker guards each provider. The state machine:
//!
//! ```text
//!            error, count >= threshold
//!   CLOSED ────────────────────────────▶ OPEN
//!     ▲                                   │ reset_timeout elapsed
//!     │ success                           ▼
//!     └──────────────────────────── HALF_OPEN
//!                 error ▲                  │
//!                 (back to OPEN) ──────────┘
//! ```
//!
//! `can_execute` is true in CLOSED and HALF_OPEN. Tripping to OPEN schedules
//! a half-open transition on the runtime after `reset_timeout`. All
//! transitions hold the breaker's lock; the timer task re-acquires it on
//! fire. Caller cancellations are never counted as provider failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::CircuitSettings;
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0=closed, 1=open, 2=half_open.
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
}

/// Circuit breaker for a single provider.
pub struct CircuitBreaker {
    provider: String,
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
    metrics: Arc<GatewayMetrics>,
    // Handed to the half-open timer task so a dropped breaker set does not
    // keep transitions alive.
    self_ref: Weak<CircuitBreaker>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    pub fn new(
        provider: impl Into<String>,
        settings: CircuitSettings,
        metrics: Arc<GatewayMetrics>,
    ) -> Arc<Self> {
        let provider = provider.into();
        Arc::new_cyclic(|weak| Self {
            provider,
            threshold: settings.failure_threshold,
            reset_timeout: settings.reset_timeout(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
            }),
            metrics,
            self_ref: weak.clone(),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("breaker lock poisoned").failure_count
    }

    /// Whether a call may be attempted right now.
    pub fn can_execute(&self) -> bool {
        matches!(
            self.state(),
            CircuitState::Closed | CircuitState::HalfOpen
        )
    }

    /// Record the outcome of a provider call.
    ///
    /// `None` is success. Cancellation errors are ignored entirely: the
    /// provider did nothing wrong when the caller walked away.
    pub fn record(&self, outcome: Option<&GatewayError>) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        if inner.state == CircuitState::Open {
            return;
        }

        match outcome {
            Some(err) => {
                if err.is_cancellation() {
                    return;
                }

                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    inner.state = CircuitState::Open;
                    self.metrics
                        .set_breaker_state(&self.provider, CircuitState::Open.as_gauge());
                    self.metrics.record_breaker_trip(&self.provider);
                    warn!(
                        provider = %self.provider,
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                    self.schedule_half_open();
                }
            }
            None => {
                if inner.state == CircuitState::HalfOpen {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    self.metrics
                        .set_breaker_state(&self.provider, CircuitState::Closed.as_gauge());
                    info!(provider = %self.provider, "circuit breaker closed");
                } else {
                    inner.failure_count = 0;
                }
            }
        }
    }

    fn schedule_half_open(&self) {
        let weak = self.self_ref.clone();
        let timeout = self.reset_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(breaker) = weak.upgrade() {
                let mut inner = breaker.inner.lock().expect("breaker lock poisoned");
                if inner.state == CircuitState::Open {
                    inner.state = CircuitState::HalfOpen;
                    breaker
                        .metrics
                        .set_breaker_state(&breaker.provider, CircuitState::HalfOpen.as_gauge());
                    info!(provider = %breaker.provider, "circuit breaker half-open");
                }
            }
        });
    }
}

/// The full set of breakers, one per provider name.
pub struct CircuitBreakerSet {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerSet {
    pub fn new(
        provider_names: &[String],
        settings: CircuitSettings,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let breakers = provider_names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    CircuitBreaker::new(name.clone(), settings, metrics.clone()),
                )
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, provider: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(provider).cloned()
    }

    /// Whether the provider may be called. Providers without a breaker are
    /// allowed through.
    pub fn can_execute(&self, provider: &str) -> bool {
        self.breakers
            .get(provider)
            .map(|b| b.can_execute())
            .unwrap_or(true)
    }

    /// Record an outcome against the provider's breaker, when one exists.
    pub fn record(&self, provider: &str, outcome: Option<&GatewayError>) {
        if let Some(breaker) = self.breakers.get(provider) {
            breaker.record(outcome);
        }
    }

    /// Current states, sorted by provider name. Admin surface.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<(String, CircuitState)> = self
            .breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    fn settings(threshold: u32, reset_ms: u64) -> CircuitSettings {
        CircuitSettings {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
        }
    }

    fn failure() -> GatewayError {
        GatewayError::MaxAttemptsExceeded {
            attempts: 3,
            last: ProviderError::server("test", 500),
        }
    }

    fn breaker(threshold: u32, reset_ms: u64) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            "test",
            settings(threshold, reset_ms),
            Arc::new(GatewayMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let b = breaker(5, 60_000);
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_execute());
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_opens_after_exactly_threshold_failures() {
        let b = breaker(3, 60_000);

        b.record(Some(&failure()));
        b.record(Some(&failure()));
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_execute());

        b.record(Some(&failure()));
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let b = breaker(3, 60_000);
        b.record(Some(&failure()));
        b.record(Some(&failure()));
        b.record(None);
        assert_eq!(b.failure_count(), 0);

        // Counting restarts from zero.
        b.record(Some(&failure()));
        b.record(Some(&failure()));
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancellation_not_counted() {
        let b = breaker(2, 60_000);
        b.record(Some(&GatewayError::Canceled));
        b.record(Some(&GatewayError::NonRetryable(ProviderError::canceled(
            "test",
        ))));
        assert_eq!(b.failure_count(), 0);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_transitions_to_half_open_after_reset_timeout() {
        let b = breaker(1, 5_000);
        b.record(Some(&failure()));
        assert_eq!(b.state(), CircuitState::Open);

        // Just before the deadline the breaker is still open.
        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let b = breaker(1, 1_000);
        b.record(Some(&failure()));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record(None);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1, 1_000);
        b.record(Some(&failure()));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record(Some(&failure()));
        assert_eq!(b.state(), CircuitState::Open);

        // And the cycle repeats: half-open again after another timeout.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_records_while_open_ignored() {
        let b = breaker(1, 60_000);
        b.record(Some(&failure()));
        assert_eq!(b.state(), CircuitState::Open);

        // Neither successes nor failures move an open breaker.
        b.record(None);
        assert_eq!(b.state(), CircuitState::Open);
        b.record(Some(&failure()));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_metrics_gauge_and_trips() {
        let metrics = Arc::new(GatewayMetrics::new());
        let b = CircuitBreaker::new("openai", settings(1, 60_000), metrics.clone());
        b.record(Some(&failure()));

        let m = metrics.provider("openai");
        assert_eq!(m.breaker_state(), 1);
        assert_eq!(m.breaker_trips(), 1);
    }

    #[tokio::test]
    async fn test_set_one_breaker_per_provider() {
        let names = vec!["a".to_string(), "b".to_string()];
        let set = CircuitBreakerSet::new(
            &names,
            settings(5, 60_000),
            Arc::new(GatewayMetrics::new()),
        );
        assert_eq!(set.len(), 2);
        assert!(set.can_execute("a"));
        assert!(set.can_execute("unknown"));
        assert!(set.get("a").is_some());
        assert!(set.get("unknown").is_none());

        let states = set.states();
        assert_eq!(states[0].0, "a");
        assert_eq!(states[0].1, CircuitState::Closed);
    }
}
