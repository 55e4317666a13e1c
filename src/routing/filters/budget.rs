//! Budget enforcement filter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::GatewayError;
use crate::routing::budget::BudgetManager;
use crate::routing::filters::{FilterInput, ProviderFilter};
use crate::traits::ChatProvider;

/// Drops providers whose cumulative spend reached their daily budget.
pub struct BudgetFilter {
    manager: Arc<dyn BudgetManager>,
}

impl BudgetFilter {
    pub fn new(manager: Arc<dyn BudgetManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ProviderFilter for BudgetFilter {
    fn name(&self) -> &str {
        "budget"
    }

    async fn filter(
        &self,
        input: FilterInput<'_>,
    ) -> Result<Vec<Arc<dyn ChatProvider>>, GatewayError> {
        let mut kept = Vec::with_capacity(input.candidates.len());
        for provider in input.candidates {
            let name = provider.name().to_string();
            if self.manager.within_budget(&name).await {
                kept.push(provider);
            } else {
                warn!(provider = %name, "budget limit reached, skipping provider");
            }
        }
        Ok(kept)
    }
}
