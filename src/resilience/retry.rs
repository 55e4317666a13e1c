//! Bounded retry with exponential back-off.
//!
//! The executor wraps a single provider call. Retryability comes from the
//! error taxonomy's `retryable` flag, never from message inspection.
//! Cancellation is honored before every attempt and during back-off sleeps;
//! a canceled retry returns [`GatewayError::Canceled`] without touching the
//! provider again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RetrySettings;
use crate::error::{GatewayError, ProviderError};
use crate::metrics::{GatewayMetrics, RetryOutcome};

/// Executor for bounded retry with exponential back-off.
#[derive(Clone)]
pub struct RetryExecutor {
    settings: RetrySettings,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl RetryExecutor {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            metrics: None,
        }
    }

    /// Report attempt outcomes to the metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> RetrySettings {
        self.settings
    }

    /// Run `operation` under the retry policy.
    ///
    /// The handler is assumed idempotent. Retryable errors are absorbed up
    /// to `max_attempts`; the first non-retryable error passes straight
    /// through wrapped as [`GatewayError::NonRetryable`], and exhaustion
    /// yields [`GatewayError::MaxAttemptsExceeded`] carrying the last error.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        provider: &str,
        mut operation: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..self.settings.max_attempts {
            if cancel.is_cancelled() {
                return Err(GatewayError::Canceled);
            }

            match operation().await {
                Ok(value) => {
                    self.count(provider, RetryOutcome::Success);
                    if attempt > 0 {
                        debug!(provider, attempts = attempt + 1, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        debug!(
                            provider,
                            error_type = err.kind.as_str(),
                            status_code = err.status_code,
                            attempt = attempt + 1,
                            "error not retryable, failing immediately"
                        );
                        self.count(provider, RetryOutcome::NonRetryable);
                        return Err(GatewayError::NonRetryable(err));
                    }

                    if attempt < self.settings.max_attempts - 1 {
                        let delay = self.backoff(attempt);
                        debug!(
                            provider,
                            error_type = err.kind.as_str(),
                            attempt = attempt + 1,
                            max_attempts = self.settings.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after error"
                        );
                        self.count(provider, RetryOutcome::Retried);
                        last_err = Some(err);

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {
                                return Err(GatewayError::Canceled);
                            }
                        }
                    } else {
                        last_err = Some(err);
                    }
                }
            }
        }

        self.count(provider, RetryOutcome::Exhausted);
        Err(GatewayError::MaxAttemptsExceeded {
            attempts: self.settings.max_attempts,
            last: last_err.unwrap_or_else(|| ProviderError::unknown(provider, None)),
        })
    }

    /// `min(initial · multiplier^attempt, max_delay)`.
    fn backoff(&self, attempt: u32) -> Duration {
        let initial = self.settings.initial_delay().as_millis() as f64;
        let factor = (self.settings.multiplier as f64).powi(attempt as i32);
        let delay = Duration::from_millis((initial * factor) as u64);
        delay.min(self.settings.max_delay())
    }

    fn count(&self, provider: &str, outcome: RetryOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_retry(provider, outcome);
        }
    }
}
