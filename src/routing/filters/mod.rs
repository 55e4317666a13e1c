//! Pre-selection candidate filters.
//!
//! Filters reduce the candidate set before the strategy picks; the pipeline
//! runs them in a fixed order: budget → rate limit → semantic, so the cheap
//! deterministic checks run before the costly intent classification.

pub mod budget;
pub mod defaults;
pub mod embedding;
pub mod keyword;
pub mod rate_limit;

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{ModelCatalog, ModelTier};
use crate::config::SemanticPolicy;
use crate::error::GatewayError;
use crate::traits::{ChatMessage, ChatProvider};

pub use budget::BudgetFilter;
pub use embedding::{cosine_similarity, Embedder, EmbeddingFilter};
pub use keyword::KeywordFilter;
pub use rate_limit::RateLimitFilter;

/// What a filter may consult while reducing candidates.
pub struct FilterInput<'a> {
    pub candidates: Vec<Arc<dyn ChatProvider>>,
    pub messages: &'a [ChatMessage],
    pub tier: Option<ModelTier>,
}

/// One stage of the filter pipeline.
#[async_trait]
pub trait ProviderFilter: Send + Sync {
    /// Stable filter name, used in errors and logs.
    fn name(&self) -> &str;

    /// Reduce the candidate set. Returning an empty set makes the pipeline
    /// fail the request with the filter's name.
    async fn filter(
        &self,
        input: FilterInput<'_>,
    ) -> Result<Vec<Arc<dyn ChatProvider>>, GatewayError>;
}

/// Build the configured semantic filter.
///
/// The embedding engine needs a local inference runtime; when it cannot be
/// constructed (missing model file, or the `onnx` feature is disabled) the
/// keyword engine takes over, so semantic routing degrades rather than
/// failing startup.
pub fn build_semantic_filter(
    policy: &SemanticPolicy,
    catalog: Arc<ModelCatalog>,
) -> Arc<dyn ProviderFilter> {
    if policy.engine == "embedding" {
        match embedding::build_onnx_filter(policy, catalog.clone()) {
            Ok(filter) => return filter,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "could not set up embedding filter, falling back to keywords"
                );
            }
        }
    }
    Arc::new(KeywordFilter::new(policy.clone()))
}
