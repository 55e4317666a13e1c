//! TOML-based gateway configuration.
//!
//! # Configuration file location
//!
//! The config file is loaded from (in order of priority):
//! 1. `MODELRELAY_CONFIG` environment variable
//! 2. `./config_test.toml` when `APP_ENV=test`
//! 3. `./config.toml`
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! auth_tokens = ["$GATEWAY_TOKEN"]
//!
//! [[providers]]
//! name = "openai"
//! api_key = "$OPENAI_API_KEY"
//! enabled = true
//!
//! [routing]
//! strategy = "cost-based"
//! fallbacks = ["anthropic", "gemini"]
//!
//! [routing.cost]
//! minimum_tier = "standard"
//!
//! [models.defaults.openai]
//! model = "openai/gpt-4o-mini"
//! max_tokens = 4096
//!
//! [resilience.retry]
//! max_attempts = 3
//!
//! [limits.providers.openai]
//! requests_per_minute = 60
//! daily_budget = 25.0
//! ```
//!
//! API keys and auth tokens support `$VAR` expansion against the process
//! environment, so secrets stay out of the file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::ModelInfo;
use crate::error::GatewayError;

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const TEST_CONFIG_FILE: &str = "config_test.toml";

// ============================================================================
// Sections
// ============================================================================

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Shared-KV backing for budgets, rate limits and usage history.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer tokens accepted on the HTTP surface. Empty = no auth.
    #[serde(default)]
    pub auth_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_tokens: Vec::new(),
        }
    }
}

/// One backend entry from the `[[providers]]` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub enabled: bool,
}

/// Routing strategy selection and its options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// One of `round-robin`, `cost-based`, `latency-based`, `weighted`.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Provider names tried after the primary, in order.
    #[serde(default)]
    pub fallbacks: Vec<String>,

    /// Weighted strategy: provider name → weight.
    #[serde(default)]
    pub weights: HashMap<String, u32>,

    /// Cost strategy options.
    #[serde(default)]
    pub cost: Option<CostOptions>,

    /// Semantic intent routing policy.
    #[serde(default)]
    pub semantic: Option<SemanticPolicy>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            fallbacks: Vec::new(),
            weights: HashMap::new(),
            cost: None,
            semantic: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostOptions {
    /// Tier applied when the request carries none.
    #[serde(default)]
    pub default_tier: Option<String>,

    /// Absolute floor when no tier constraint applies.
    #[serde(default)]
    pub minimum_tier: Option<String>,
}

/// Semantic intent routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticPolicy {
    #[serde(default)]
    pub enabled: bool,

    /// `keyword` or `embedding`.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Minimum cosine similarity before the argmax group wins.
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Group used when nothing matches.
    #[serde(default)]
    pub default_group: String,

    /// Merge the system-defined groups under the configured ones.
    #[serde(default)]
    pub extend_defaults: bool,

    /// Path to the ONNX embedding model (embedding engine only).
    #[serde(default)]
    pub model_path: Option<String>,

    #[serde(default)]
    pub groups: Vec<IntentGroup>,
}

impl Default for SemanticPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: default_engine(),
            threshold: default_threshold(),
            default_group: String::new(),
            extend_defaults: false,
            model_path: None,
            groups: Vec::new(),
        }
    }
}

/// An intent group: how to recognize it and where it routes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentGroup {
    pub name: String,

    /// Substring keywords for the keyword engine.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Intent description, embedded into the group centroid.
    #[serde(default)]
    pub description: String,

    /// Few-shot example prompts, embedded into the group centroid.
    #[serde(default)]
    pub examples: Vec<String>,

    /// Explicit provider allow-list.
    #[serde(default)]
    pub allow_providers: Vec<String>,

    /// Capability-based discovery when no explicit allow-list is set.
    #[serde(default)]
    pub required_capability: Option<String>,
}

/// Per-provider model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefaults {
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Provider name → default model + max tokens.
    #[serde(default)]
    pub defaults: HashMap<String, ModelDefaults>,

    /// User catalog entries, merged over the built-in catalog by ID.
    #[serde(default)]
    pub catalog: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Upstream call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit_breaker: CircuitSettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitSettings::default(),
        }
    }
}

/// Bounded-retry parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Circuit breaker parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitSettings {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Open → half-open delay in milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl CircuitSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-provider limits keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderLimits>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderLimits {
    /// Requests per minute; 0 or absent = unlimited.
    #[serde(default)]
    pub requests_per_minute: u32,

    /// Cumulative daily budget in USD; absent = unlimited.
    #[serde(default)]
    pub daily_budget: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// ============================================================================
// Resolved provider settings
// ============================================================================

/// Everything the factory needs to build one adapter, resolved from the
/// config sections.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Lower-cased provider name.
    pub name: String,
    pub api_key: String,
    pub enabled: bool,
    pub timeout: Duration,
    /// Registry ID of the adapter's default model.
    pub default_model: String,
    pub max_tokens: u32,
    pub requests_per_minute: u32,
    pub daily_budget: Option<f64>,
}

// ============================================================================
// Loading
// ============================================================================

impl GatewayConfig {
    /// Load, expand and validate the configuration file.
    pub fn load() -> Result<Self, GatewayError> {
        let path = std::env::var("MODELRELAY_CONFIG").unwrap_or_else(|_| {
            if std::env::var("APP_ENV").as_deref() == Ok("test") {
                TEST_CONFIG_FILE.to_string()
            } else {
                DEFAULT_CONFIG_FILE.to_string()
            }
        });
        Self::from_file(&path)
    }

    /// Load from an explicit path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&raw)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse from a TOML string, expand env references, dedupe and validate.
    pub fn from_toml(raw: &str) -> Result<Self, GatewayError> {
        let mut config: GatewayConfig = toml::from_str(raw)
            .map_err(|e| GatewayError::Config(format!("failed to parse config: {e}")))?;

        config.expand_env();
        config.deduplicate_providers();
        config.validate()?;
        Ok(config)
    }

    /// Expand `$VAR` references in API keys and auth tokens.
    fn expand_env(&mut self) {
        for provider in &mut self.providers {
            provider.api_key = expand_var(&provider.api_key);
        }
        for token in &mut self.server.auth_tokens {
            *token = expand_var(token);
        }
    }

    /// Lower-case provider names and keep the last entry per name.
    fn deduplicate_providers(&mut self) {
        let mut seen: HashMap<String, ProviderConfig> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for mut provider in self.providers.drain(..) {
            provider.name = provider.name.to_lowercase();
            if !seen.contains_key(&provider.name) {
                order.push(provider.name.clone());
            }
            seen.insert(provider.name.clone(), provider);
        }

        self.providers = order
            .into_iter()
            .filter_map(|name| seen.remove(&name))
            .collect();
    }

    /// Structural validation; model-compatibility checks happen in the
    /// provider factory where the catalog is available.
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self.routing.strategy.as_str() {
            "round-robin" | "cost-based" | "latency-based" | "weighted" => {}
            other => {
                return Err(GatewayError::Config(format!(
                    "unsupported routing strategy: {other} \
                     (supported: round-robin, cost-based, latency-based, weighted)"
                )))
            }
        }

        if self.routing.strategy == "weighted" && self.routing.weights.is_empty() {
            return Err(GatewayError::Config(
                "weighted strategy requires at least one weight definition".to_string(),
            ));
        }

        if let Some(cost) = &self.routing.cost {
            for tier in [&cost.default_tier, &cost.minimum_tier].into_iter().flatten() {
                tier.parse::<crate::catalog::ModelTier>()?;
            }
        }

        if let Some(semantic) = &self.routing.semantic {
            if semantic.enabled
                && semantic.engine != "keyword"
                && semantic.engine != "embedding"
            {
                return Err(GatewayError::Config(format!(
                    "unsupported semantic engine: {}",
                    semantic.engine
                )));
            }
        }

        Ok(())
    }

    /// Resolve the enabled providers into factory-ready settings.
    pub fn enabled_providers(&self) -> Vec<ProviderSettings> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| {
                let defaults = self.models.defaults.get(&p.name);
                let limits = self.limits.providers.get(&p.name).copied().unwrap_or_default();
                ProviderSettings {
                    name: p.name.clone(),
                    api_key: p.api_key.clone(),
                    enabled: p.enabled,
                    timeout: Duration::from_millis(self.resilience.timeout_ms),
                    default_model: defaults.map(|d| d.model.clone()).unwrap_or_default(),
                    max_tokens: defaults.map(|d| d.max_tokens).unwrap_or_else(default_max_tokens),
                    requests_per_minute: limits.requests_per_minute,
                    daily_budget: limits.daily_budget,
                }
            })
            .collect()
    }

    /// Provider name → RPM limit, for the rate-limit filter. Providers
    /// without a positive limit are omitted.
    pub fn rate_limits(&self) -> HashMap<String, u32> {
        self.limits
            .providers
            .iter()
            .filter(|(_, l)| l.requests_per_minute > 0)
            .map(|(name, l)| (name.clone(), l.requests_per_minute))
            .collect()
    }

    /// Provider name → daily budget, for the budget manager.
    pub fn budget_limits(&self) -> HashMap<String, f64> {
        self.limits
            .providers
            .iter()
            .filter_map(|(name, l)| l.daily_budget.map(|b| (name.clone(), b)))
            .collect()
    }
}

/// Expand a single `$VAR` reference against the environment. Literal values
/// pass through unchanged; unset variables expand to empty (caught by the
/// factory's api-key validation).
fn expand_var(value: &str) -> String {
    match value.strip_prefix('$') {
        Some(name) => std::env::var(name).unwrap_or_default(),
        None => value.to_string(),
    }
}

// ============================================================================
// Serde defaults
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_strategy() -> String {
    "round-robin".to_string()
}

fn default_engine() -> String {
    "keyword".to_string()
}

fn default_threshold() -> f32 {
    0.5
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}
