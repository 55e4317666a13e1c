//! Adapter construction from resolved provider settings.
//!
//! The factory validates each provider entry (non-empty API key, enabled
//! flag, default model present in the catalog with a matching provider
//! prefix) before building the adapter, and wraps every adapter in the
//! latency decorator when a tracker is attached.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::ModelCatalog;
use crate::config::ProviderSettings;
use crate::error::GatewayError;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::latency::LatencyWatch;
use crate::providers::openai::OpenAIProvider;
use crate::routing::latency::LatencyTracker;
use crate::traits::ChatProvider;

/// Builds provider adapters from config.
pub struct ProviderFactory {
    catalog: Arc<ModelCatalog>,
    tracker: Option<Arc<LatencyTracker>>,
}

impl ProviderFactory {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self {
            catalog,
            tracker: None,
        }
    }

    /// Wrap every created adapter in the latency decorator.
    pub fn with_latency_tracker(mut self, tracker: Arc<LatencyTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Build one adapter, validating its settings first.
    pub fn create(&self, settings: &ProviderSettings) -> Result<Arc<dyn ChatProvider>, GatewayError> {
        self.validate(settings)?;

        let adapter: Arc<dyn ChatProvider> = match settings.name.as_str() {
            "openai" => Arc::new(OpenAIProvider::new(settings, self.catalog.clone())?),
            "anthropic" => Arc::new(AnthropicProvider::new(settings, self.catalog.clone())?),
            "gemini" => Arc::new(GeminiProvider::new(settings, self.catalog.clone())?),
            other => {
                return Err(GatewayError::Config(format!("unknown provider: {other}")))
            }
        };

        Ok(match &self.tracker {
            Some(tracker) => Arc::new(LatencyWatch::new(adapter, tracker.clone())),
            None => adapter,
        })
    }

    /// Build all adapters, skipping (and logging) any that fail validation.
    pub fn create_all(&self, settings: &[ProviderSettings]) -> Vec<Arc<dyn ChatProvider>> {
        let mut providers = Vec::with_capacity(settings.len());
        for entry in settings {
            match self.create(entry) {
                Ok(provider) => {
                    info!(
                        provider = %entry.name,
                        model = %entry.default_model,
                        "provider created"
                    );
                    providers.push(provider);
                }
                Err(err) => {
                    warn!(provider = %entry.name, error = %err, "failed to create provider");
                }
            }
        }
        providers
    }

    fn validate(&self, settings: &ProviderSettings) -> Result<(), GatewayError> {
        if settings.api_key.is_empty() {
            return Err(GatewayError::Config(format!(
                "API key is required for provider {}",
                settings.name
            )));
        }

        if !settings.enabled {
            return Err(GatewayError::Config(format!(
                "provider {} is disabled",
                settings.name
            )));
        }

        if settings.default_model.is_empty() {
            return Err(GatewayError::Config(format!(
                "default model is required for provider {}",
                settings.name
            )));
        }

        let model_provider = self.catalog.validate_model_id(&settings.default_model)?;
        if model_provider != settings.name {
            return Err(GatewayError::Config(format!(
                "model {} is not compatible with provider {} (expected {})",
                settings.default_model, settings.name, model_provider
            )));
        }

        Ok(())
    }
}
