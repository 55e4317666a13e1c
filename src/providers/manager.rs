//! Provider manager: the live set of backend adapters.
//!
//! Reads return a copy of the slice so callers never observe a mid-mutation
//! tear; mutation takes the writer lock. The manager owns nothing about
//! routing; it is a name-addressed collection.

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::error::GatewayError;
use crate::traits::ChatProvider;

/// Live set of provider adapters.
pub struct ProviderManager {
    providers: RwLock<Vec<Arc<dyn ChatProvider>>>,
}

impl ProviderManager {
    /// Create a manager over an initial adapter set.
    ///
    /// Fails when the set is empty: a gateway without providers cannot serve
    /// anything.
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Result<Self, GatewayError> {
        if providers.is_empty() {
            return Err(GatewayError::NoProviders);
        }
        info!(total_providers = providers.len(), "provider manager initialized");
        Ok(Self {
            providers: RwLock::new(providers),
        })
    }

    /// A copy of the current adapter slice.
    pub fn all(&self) -> Vec<Arc<dyn ChatProvider>> {
        self.providers.read().expect("manager lock poisoned").clone()
    }

    /// Look up an adapter by provider name.
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers
            .read()
            .expect("manager lock poisoned")
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Names of the current adapters, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .expect("manager lock poisoned")
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.providers.read().expect("manager lock poisoned").len()
    }

    /// Add an adapter; errors when the name is already registered.
    pub fn add(&self, provider: Arc<dyn ChatProvider>) -> Result<(), GatewayError> {
        let mut providers = self.providers.write().expect("manager lock poisoned");
        if providers.iter().any(|p| p.name() == provider.name()) {
            return Err(GatewayError::Config(format!(
                "provider {} already exists",
                provider.name()
            )));
        }
        info!(provider = provider.name(), "provider added");
        providers.push(provider);
        Ok(())
    }

    /// Remove an adapter by name; errors when absent.
    pub fn remove(&self, name: &str) -> Result<(), GatewayError> {
        let mut providers = self.providers.write().expect("manager lock poisoned");
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        if providers.len() == before {
            return Err(GatewayError::Config(format!("provider {name} not found")));
        }
        info!(provider = name, "provider removed");
        Ok(())
    }

    /// Replace the whole adapter set.
    pub fn replace_all(&self, new_providers: Vec<Arc<dyn ChatProvider>>) {
        *self.providers.write().expect("manager lock poisoned") = new_providers;
    }
}
