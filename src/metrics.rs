//! Gateway metrics: lock-free counters with Prometheus text exposition.
//!
//! Every counter is a plain atomic so recording from the request path never
//! contends; the per-provider map takes its lock only on first sight of a
//! provider name. `render` produces the text exposition format served by the
//! metrics listener.
//!
//! Exposed series:
//! - `modelrelay_http_requests_total{status}`
//! - `modelrelay_provider_requests_total{provider,status}`
//! - `modelrelay_provider_latency_ms_sum|count{provider}`
//! - `modelrelay_provider_tokens_total{provider,type}`
//! - `modelrelay_provider_cost_usd_total{provider}`
//! - `modelrelay_circuit_breaker_state{provider}` (0=closed, 1=open, 2=half_open)
//! - `modelrelay_circuit_breaker_trips_total{provider}`
//! - `modelrelay_retry_attempts_total{provider,outcome}`
//! - `modelrelay_cache_hits_total`, `modelrelay_cache_misses_total`

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// Outcome label for retry attempt accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The attempt succeeded.
    Success,
    /// A retryable error was absorbed and the call will be re-attempted.
    Retried,
    /// All attempts were consumed.
    Exhausted,
    /// The error was not retryable; no further attempts.
    NonRetryable,
}

impl RetryOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Success => "success",
            RetryOutcome::Retried => "retried",
            RetryOutcome::Exhausted => "exhausted",
            RetryOutcome::NonRetryable => "non_retryable",
        }
    }
}

/// Counters for a single provider.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    requests_ok: AtomicU64,
    requests_err: AtomicU64,
    latency_ms_sum: AtomicU64,
    latency_count: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_microdollars: AtomicU64,
    breaker_state: AtomicU8,
    breaker_trips: AtomicU64,
    retry_success: AtomicU64,
    retry_retried: AtomicU64,
    retry_exhausted: AtomicU64,
    retry_non_retryable: AtomicU64,
}

impl ProviderMetrics {
    /// Cumulative cost in USD.
    pub fn cost_usd(&self) -> f64 {
        self.cost_microdollars.load(Ordering::Relaxed) as f64 / 1e6
    }

    pub fn requests_ok(&self) -> u64 {
        self.requests_ok.load(Ordering::Relaxed)
    }

    pub fn requests_err(&self) -> u64 {
        self.requests_err.load(Ordering::Relaxed)
    }

    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips.load(Ordering::Relaxed)
    }

    pub fn breaker_state(&self) -> u8 {
        self.breaker_state.load(Ordering::Relaxed)
    }

    /// Average observed latency in milliseconds, 0 when unmeasured.
    pub fn average_latency_ms(&self) -> f64 {
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.latency_ms_sum.load(Ordering::Relaxed) as f64 / count as f64
    }
}

/// Process-wide metrics registry.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    providers: RwLock<HashMap<String, Arc<ProviderMetrics>>>,
    http_2xx: AtomicU64,
    http_4xx: AtomicU64,
    http_5xx: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-provider counters, created on first use.
    pub fn provider(&self, name: &str) -> Arc<ProviderMetrics> {
        if let Some(existing) = self
            .providers
            .read()
            .expect("metrics lock poisoned")
            .get(name)
        {
            return existing.clone();
        }
        let mut providers = self.providers.write().expect("metrics lock poisoned");
        providers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ProviderMetrics::default()))
            .clone()
    }

    pub fn record_http(&self, status: u16) {
        let counter = match status {
            200..=399 => &self.http_2xx,
            400..=499 => &self.http_4xx,
            _ => &self.http_5xx,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self, provider: &str, ok: bool, latency_ms: u64) {
        let metrics = self.provider(provider);
        if ok {
            metrics.requests_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            metrics.requests_err.fetch_add(1, Ordering::Relaxed);
        }
        metrics.latency_ms_sum.fetch_add(latency_ms, Ordering::Relaxed);
        metrics.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, provider: &str, input: u64, output: u64) {
        let metrics = self.provider(provider);
        metrics.input_tokens.fetch_add(input, Ordering::Relaxed);
        metrics.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    pub fn record_cost(&self, provider: &str, usd: f64) {
        let micro = (usd * 1e6).round().max(0.0) as u64;
        self.provider(provider)
            .cost_microdollars
            .fetch_add(micro, Ordering::Relaxed);
    }

    /// Breaker state gauge: 0=closed, 1=open, 2=half_open.
    pub fn set_breaker_state(&self, provider: &str, state: u8) {
        self.provider(provider)
            .breaker_state
            .store(state, Ordering::Relaxed);
    }

    pub fn record_breaker_trip(&self, provider: &str) {
        self.provider(provider)
            .breaker_trips
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self, provider: &str, outcome: RetryOutcome) {
        let metrics = self.provider(provider);
        let counter = match outcome {
            RetryOutcome::Success => &metrics.retry_success,
            RetryOutcome::Retried => &metrics.retry_retried,
            RetryOutcome::Exhausted => &metrics.retry_exhausted,
            RetryOutcome::NonRetryable => &metrics.retry_non_retryable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(4096);

        writeln!(out, "# HELP modelrelay_http_requests_total Total HTTP requests received").ok();
        writeln!(out, "# TYPE modelrelay_http_requests_total counter").ok();
        for (class, counter) in [
            ("2xx", &self.http_2xx),
            ("4xx", &self.http_4xx),
            ("5xx", &self.http_5xx),
        ] {
            writeln!(
                out,
                "modelrelay_http_requests_total{{status=\"{class}\"}} {}",
                counter.load(Ordering::Relaxed)
            )
            .ok();
        }

        let providers = self.providers.read().expect("metrics lock poisoned");
        let mut names: Vec<&String> = providers.keys().collect();
        names.sort();

        writeln!(out, "# HELP modelrelay_provider_requests_total Total requests to each provider").ok();
        writeln!(out, "# TYPE modelrelay_provider_requests_total counter").ok();
        for name in &names {
            let m = &providers[*name];
            writeln!(
                out,
                "modelrelay_provider_requests_total{{provider=\"{name}\",status=\"ok\"}} {}",
                m.requests_ok.load(Ordering::Relaxed)
            )
            .ok();
            writeln!(
                out,
                "modelrelay_provider_requests_total{{provider=\"{name}\",status=\"error\"}} {}",
                m.requests_err.load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(out, "# HELP modelrelay_provider_latency_ms Provider request latency").ok();
        writeln!(out, "# TYPE modelrelay_provider_latency_ms summary").ok();
        for name in &names {
            let m = &providers[*name];
            writeln!(
                out,
                "modelrelay_provider_latency_ms_sum{{provider=\"{name}\"}} {}",
                m.latency_ms_sum.load(Ordering::Relaxed)
            )
            .ok();
            writeln!(
                out,
                "modelrelay_provider_latency_ms_count{{provider=\"{name}\"}} {}",
                m.latency_count.load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(out, "# HELP modelrelay_provider_tokens_total Total tokens consumed per provider").ok();
        writeln!(out, "# TYPE modelrelay_provider_tokens_total counter").ok();
        for name in &names {
            let m = &providers[*name];
            writeln!(
                out,
                "modelrelay_provider_tokens_total{{provider=\"{name}\",type=\"input\"}} {}",
                m.input_tokens.load(Ordering::Relaxed)
            )
            .ok();
            writeln!(
                out,
                "modelrelay_provider_tokens_total{{provider=\"{name}\",type=\"output\"}} {}",
                m.output_tokens.load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(out, "# HELP modelrelay_provider_cost_usd_total Total cost in USD per provider").ok();
        writeln!(out, "# TYPE modelrelay_provider_cost_usd_total counter").ok();
        for name in &names {
            writeln!(
                out,
                "modelrelay_provider_cost_usd_total{{provider=\"{name}\"}} {:.6}",
                providers[*name].cost_usd()
            )
            .ok();
        }

        writeln!(out, "# HELP modelrelay_circuit_breaker_state Circuit breaker state (0=closed, 1=open, 2=half_open)").ok();
        writeln!(out, "# TYPE modelrelay_circuit_breaker_state gauge").ok();
        for name in &names {
            writeln!(
                out,
                "modelrelay_circuit_breaker_state{{provider=\"{name}\"}} {}",
                providers[*name].breaker_state.load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(out, "# HELP modelrelay_circuit_breaker_trips_total Number of times circuit breaker opened").ok();
        writeln!(out, "# TYPE modelrelay_circuit_breaker_trips_total counter").ok();
        for name in &names {
            writeln!(
                out,
                "modelrelay_circuit_breaker_trips_total{{provider=\"{name}\"}} {}",
                providers[*name].breaker_trips.load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(out, "# HELP modelrelay_retry_attempts_total Total retry attempts by outcome").ok();
        writeln!(out, "# TYPE modelrelay_retry_attempts_total counter").ok();
        for name in &names {
            let m = &providers[*name];
            for (outcome, counter) in [
                (RetryOutcome::Success, &m.retry_success),
                (RetryOutcome::Retried, &m.retry_retried),
                (RetryOutcome::Exhausted, &m.retry_exhausted),
                (RetryOutcome::NonRetryable, &m.retry_non_retryable),
            ] {
                writeln!(
                    out,
                    "modelrelay_retry_attempts_total{{provider=\"{name}\",outcome=\"{}\"}} {}",
                    outcome.as_str(),
                    counter.load(Ordering::Relaxed)
                )
                .ok();
            }
        }

        writeln!(out, "# HELP modelrelay_cache_hits_total Total cache hits").ok();
        writeln!(out, "# TYPE modelrelay_cache_hits_total counter").ok();
        writeln!(out, "modelrelay_cache_hits_total {}", self.cache_hits.load(Ordering::Relaxed)).ok();
        writeln!(out, "# HELP modelrelay_cache_misses_total Total cache misses").ok();
        writeln!(out, "# TYPE modelrelay_cache_misses_total counter").ok();
        writeln!(out, "modelrelay_cache_misses_total {}", self.cache_misses.load(Ordering::Relaxed)).ok();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters() {
        let metrics = GatewayMetrics::new();
        metrics.record_request("openai", true, 120);
        metrics.record_request("openai", true, 80);
        metrics.record_request("openai", false, 50);

        let m = metrics.provider("openai");
        assert_eq!(m.requests_ok(), 2);
        assert_eq!(m.requests_err(), 1);
        assert!((m.average_latency_ms() - (250.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_cost_accumulates_in_microdollars() {
        let metrics = GatewayMetrics::new();
        metrics.record_cost("openai", 0.000_123);
        metrics.record_cost("openai", 0.000_2);
        let cost = metrics.provider("openai").cost_usd();
        assert!((cost - 0.000_323).abs() < 1e-9);
    }

    #[test]
    fn test_breaker_gauge_and_trips() {
        let metrics = GatewayMetrics::new();
        metrics.set_breaker_state("gemini", 1);
        metrics.record_breaker_trip("gemini");
        metrics.record_breaker_trip("gemini");

        let m = metrics.provider("gemini");
        assert_eq!(m.breaker_state(), 1);
        assert_eq!(m.breaker_trips(), 2);
    }

    #[test]
    fn test_same_provider_same_counters() {
        let metrics = GatewayMetrics::new();
        let a = metrics.provider("openai");
        let b = metrics.provider("openai");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_render_contains_series() {
        let metrics = GatewayMetrics::new();
        metrics.record_request("openai", true, 42);
        metrics.record_tokens("openai", 100, 20);
        metrics.record_cost("openai", 0.5);
        metrics.record_retry("openai", RetryOutcome::Exhausted);
        metrics.record_http(200);
        metrics.record_http(503);

        let text = metrics.render();
        assert!(text.contains(
            "modelrelay_provider_requests_total{provider=\"openai\",status=\"ok\"} 1"
        ));
        assert!(text.contains(
            "modelrelay_provider_tokens_total{provider=\"openai\",type=\"input\"} 100"
        ));
        assert!(text.contains("modelrelay_provider_cost_usd_total{provider=\"openai\"} 0.500000"));
        assert!(text.contains(
            "modelrelay_retry_attempts_total{provider=\"openai\",outcome=\"exhausted\"} 1"
        ));
        assert!(text.contains("modelrelay_http_requests_total{status=\"2xx\"} 1"));
        assert!(text.contains("modelrelay_http_requests_total{status=\"5xx\"} 1"));
    }

    #[test]
    fn test_average_latency_unmeasured_is_zero() {
        let metrics = GatewayMetrics::new();
        assert_eq!(metrics.provider("fresh").average_latency_ms(), 0.0);
    }
}
