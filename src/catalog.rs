//! Model catalog: the immutable-after-init registry of known models.
//!
//! The catalog maps registry IDs (`"<provider>/<model>"`) to descriptors
//! carrying cost, tier, context window and capabilities. It is populated once
//! at startup from the built-in defaults merged with the user catalog from
//! config (user entries override by ID), then serves reads for the lifetime
//! of the bundle. A shared lock guards the map so a future hot-reload can
//! republish it without torn reads.
//!
//! Cost math lives here too: `cost_for` prices a call from per-1M token
//! rates, and `cheapest` orders models by the arithmetic mean of input and
//! output cost.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

// ============================================================================
// Tiers
// ============================================================================

/// Discrete quality band of a model.
///
/// The derived ordering is the tier ladder: `Budget < Standard < Premium <
/// UltraPremium`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    Budget,
    Standard,
    Premium,
    UltraPremium,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Budget => "budget",
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
            ModelTier::UltraPremium => "ultra-premium",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "budget" => Ok(ModelTier::Budget),
            "standard" => Ok(ModelTier::Standard),
            "premium" => Ok(ModelTier::Premium),
            "ultra-premium" => Ok(ModelTier::UltraPremium),
            other => Err(GatewayError::Config(format!("unknown tier: {other}"))),
        }
    }
}

// ============================================================================
// Model Descriptors
// ============================================================================

/// Immutable descriptor of a known model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Registry ID, format `"<provider>/<model>"`.
    pub id: String,

    /// Owning provider name, lower-cased.
    pub provider: String,

    /// Human-readable display name.
    #[serde(default)]
    pub display_name: String,

    /// USD per one million input tokens.
    pub input_cost_per_1m: f64,

    /// USD per one million output tokens.
    pub output_cost_per_1m: f64,

    /// Context window in tokens.
    pub context_window: u32,

    /// Quality band.
    pub tier: ModelTier,

    /// Capability tags (`"coding"`, `"vision"`, ...).
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl ModelInfo {
    /// Ordering key for `cheapest`: mean of input and output per-1M cost.
    pub fn mean_cost(&self) -> f64 {
        (self.input_cost_per_1m + self.output_cost_per_1m) / 2.0
    }
}

/// Split a registry ID into `(provider, model)`.
pub fn split_model_id(id: &str) -> Result<(&str, &str), GatewayError> {
    match id.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(GatewayError::Config(format!(
            "invalid model ID format: {id} (expected provider/model)"
        ))),
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Registry of known models, read-only after initialization.
pub struct ModelCatalog {
    models: RwLock<HashMap<String, ModelInfo>>,
}

impl ModelCatalog {
    /// Build a catalog from the built-in defaults merged with user overrides.
    ///
    /// Overrides win by ID, so config can re-price or re-tier a default
    /// entry as well as add new ones.
    pub fn new(overrides: Vec<ModelInfo>) -> Self {
        let mut models = HashMap::new();
        for entry in default_catalog().into_iter().chain(overrides) {
            models.insert(entry.id.clone(), entry);
        }
        Self {
            models: RwLock::new(models),
        }
    }

    /// A catalog holding exactly the given entries, no defaults. Test seam.
    pub fn from_entries(entries: Vec<ModelInfo>) -> Self {
        let mut models = HashMap::new();
        for entry in entries {
            models.insert(entry.id.clone(), entry);
        }
        Self {
            models: RwLock::new(models),
        }
    }

    /// Look up a descriptor by registry ID.
    pub fn get(&self, id: &str) -> Result<ModelInfo, GatewayError> {
        self.models
            .read()
            .expect("catalog lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Config(format!("unknown model: {id}")))
    }

    /// All models belonging to a provider.
    pub fn list_by_provider(&self, provider: &str) -> Vec<ModelInfo> {
        self.models
            .read()
            .expect("catalog lock poisoned")
            .values()
            .filter(|m| m.provider == provider)
            .cloned()
            .collect()
    }

    /// All models belonging to a provider in a specific tier.
    pub fn list_by_provider_and_tier(&self, provider: &str, tier: ModelTier) -> Vec<ModelInfo> {
        self.models
            .read()
            .expect("catalog lock poisoned")
            .values()
            .filter(|m| m.provider == provider && m.tier == tier)
            .cloned()
            .collect()
    }

    /// Models of a provider at or above a minimum tier.
    pub fn models_at_or_above(&self, provider: &str, minimum: ModelTier) -> Vec<ModelInfo> {
        self.models
            .read()
            .expect("catalog lock poisoned")
            .values()
            .filter(|m| m.provider == provider && m.tier >= minimum)
            .cloned()
            .collect()
    }

    /// Names of providers that have at least one model with the capability.
    pub fn providers_with_capability(&self, capability: &str) -> Vec<String> {
        let models = self.models.read().expect("catalog lock poisoned");
        let mut names: Vec<String> = models
            .values()
            .filter(|m| m.capabilities.contains(capability))
            .map(|m| m.provider.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Validate a registry ID and return its provider prefix.
    pub fn validate_model_id(&self, id: &str) -> Result<String, GatewayError> {
        let (provider, _) = split_model_id(id)?;
        self.get(id)?;
        Ok(provider.to_string())
    }

    /// Price a call: `in·input_cost/1M + out·output_cost/1M`.
    pub fn cost_for(
        &self,
        id: &str,
        input_tokens: usize,
        output_tokens: usize,
    ) -> Result<f64, GatewayError> {
        let info = self.get(id)?;
        let input = input_tokens as f64 * info.input_cost_per_1m / 1_000_000.0;
        let output = output_tokens as f64 * info.output_cost_per_1m / 1_000_000.0;
        Ok(input + output)
    }

    /// The cheapest model of a subset by mean per-1M cost. Ties keep the
    /// first entry in the subset's order.
    pub fn cheapest(models: &[ModelInfo]) -> Option<ModelInfo> {
        let mut best: Option<&ModelInfo> = None;
        for model in models {
            match best {
                Some(current) if model.mean_cost() >= current.mean_cost() => {}
                _ => best = Some(model),
            }
        }
        best.cloned()
    }

    pub fn len(&self) -> usize {
        self.models.read().expect("catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Default Catalog
// ============================================================================

fn entry(
    id: &str,
    display_name: &str,
    input_cost: f64,
    output_cost: f64,
    context_window: u32,
    tier: ModelTier,
    capabilities: &[&str],
) -> ModelInfo {
    let (provider, _) = id.split_once('/').expect("default catalog IDs are well-formed");
    ModelInfo {
        id: id.to_string(),
        provider: provider.to_string(),
        display_name: display_name.to_string(),
        input_cost_per_1m: input_cost,
        output_cost_per_1m: output_cost,
        context_window,
        tier,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
    }
}

/// Built-in model catalog, merged under any user catalog at startup.
pub fn default_catalog() -> Vec<ModelInfo> {
    use ModelTier::*;

    vec![
        // OpenAI
        entry("openai/gpt-5.1", "GPT-5.1", 7.50, 22.50, 200_000, UltraPremium, &["coding", "vision"]),
        entry("openai/gpt-5", "GPT-5", 5.00, 15.00, 200_000, UltraPremium, &["coding", "vision"]),
        entry("openai/gpt-4o", "GPT-4o", 2.50, 10.00, 128_000, Premium, &["coding", "vision"]),
        entry("openai/gpt-3.5-turbo", "GPT-3.5 Turbo", 0.50, 1.50, 16_385, Standard, &[]),
        entry("openai/gpt-4o-mini", "GPT-4o Mini", 0.15, 0.60, 128_000, Budget, &["coding"]),
        // Anthropic
        entry("anthropic/claude-opus-4.5", "Claude Opus 4.5", 15.00, 75.00, 200_000, UltraPremium, &["coding", "vision"]),
        entry("anthropic/claude-sonnet-4", "Claude Sonnet 4", 3.00, 15.00, 200_000, Premium, &["coding", "vision"]),
        entry("anthropic/claude-haiku-4.5", "Claude Haiku 4.5", 0.80, 4.00, 200_000, Standard, &["coding"]),
        entry("anthropic/claude-haiku-3", "Claude Haiku 3", 0.25, 1.25, 200_000, Standard, &[]),
        // Gemini
        entry("gemini/gemini-3-pro", "Gemini 3.0 Pro", 2.00, 12.00, 1_000_000, Premium, &["coding", "vision"]),
        entry("gemini/gemini-2.5-pro", "Gemini 2.5 Pro", 1.25, 10.00, 1_000_000, Premium, &["coding", "vision"]),
        entry("gemini/gemini-3-flash", "Gemini 3.0 Flash", 0.50, 3.00, 1_000_000, Standard, &["coding"]),
        entry("gemini/gemini-2.5-flash", "Gemini 2.5 Flash", 0.30, 2.50, 1_000_000, Standard, &[]),
        entry("gemini/gemini-2.5-flash-lite", "Gemini 2.5 Flash Lite", 0.10, 0.40, 1_000_000, Budget, &[]),
    ]
}
