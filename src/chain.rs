//! Fallback chain construction and execution.
//!
//! The chain turns a single routing decision into resilient execution:
//! the primary selection first, then each configured fallback, deduplicated
//! by provider name. Every link is attempted under the retry executor and
//! recorded against its circuit breaker; budget, usage history and metrics
//! are updated on success.
//!
//! # Chain flavors
//!
//! - **Tier-aware**: the selection bound a model whose catalog lookup
//!   succeeds. Each fallback contributes its cheapest model in the primary
//!   model's tier (falling back to its overall cheapest when it has none in
//!   that tier).
//! - **Simple**: a model was bound but its lookup fails. Each fallback
//!   contributes its overall cheapest model.
//! - **Plain**: no model bound. Links carry providers only and adapters
//!   use their default models.
//!
//! # Streaming
//!
//! A producer task walks the chain and writes chunks into a bounded
//! channel. Failures before the first delivered chunk fall back silently to
//! the next link; failures after data has flowed surface as a terminal
//! error chunk. The producer closes the channel on every exit path and
//! stops when the consumer hangs up or the request is canceled.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ModelCatalog;
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::providers::manager::ProviderManager;
use crate::resilience::circuit::CircuitBreakerSet;
use crate::resilience::retry::RetryExecutor;
use crate::routing::budget::BudgetManager;
use crate::routing::usage::UsageHistory;
use crate::routing::Selection;
use crate::traits::{
    ChatProvider, ChunkStream, CompletionInput, CompletionResponse, StreamChunk,
};

// ============================================================================
// Chain construction
// ============================================================================

/// One attemptable `(provider, model?)` pair.
pub struct ChainLink {
    pub provider: Arc<dyn ChatProvider>,
    pub model: Option<String>,
}

/// Build the fallback chain for a selection.
///
/// The primary is always first; fallbacks follow in configured order,
/// deduplicated by provider name. Fallback names unknown to the manager are
/// skipped.
pub fn build_chain(
    selection: &Selection,
    fallbacks: &[String],
    manager: &ProviderManager,
    catalog: &ModelCatalog,
) -> Vec<ChainLink> {
    let mut chain = Vec::with_capacity(fallbacks.len() + 1);
    let mut seen = vec![selection.provider.name().to_string()];

    chain.push(ChainLink {
        provider: selection.provider.clone(),
        model: selection.model.clone(),
    });

    let primary_tier = selection
        .model
        .as_deref()
        .and_then(|id| catalog.get(id).ok())
        .map(|info| info.tier);

    for name in fallbacks {
        if seen.iter().any(|s| s == name) {
            continue;
        }
        let Some(provider) = manager.by_name(name) else {
            debug!(provider = %name, "fallback provider not registered, skipping");
            continue;
        };

        let model = if selection.model.is_some() {
            let tiered = primary_tier
                .map(|tier| catalog.list_by_provider_and_tier(name, tier))
                .filter(|models| !models.is_empty())
                .unwrap_or_else(|| catalog.list_by_provider(name));
            ModelCatalog::cheapest(&tiered).map(|m| m.id)
        } else {
            None
        };

        seen.push(name.clone());
        chain.push(ChainLink { provider, model });
    }

    chain
}

// ============================================================================
// Execution
// ============================================================================

/// What a successful chain execution produced.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub response: CompletionResponse,
    /// Name of the provider that served the request.
    pub provider: String,
    /// Model the serving link had bound, when any.
    pub model: Option<String>,
    /// 1-based position of the serving link in the chain.
    pub attempt: usize,
}

/// Runs a chain with retry, breaker, budget and usage recording.
pub struct FallbackExecutor {
    retry: RetryExecutor,
    circuits: Arc<CircuitBreakerSet>,
    budget: Arc<dyn BudgetManager>,
    history: Arc<dyn UsageHistory>,
    metrics: Arc<GatewayMetrics>,
}

impl FallbackExecutor {
    pub fn new(
        retry: RetryExecutor,
        circuits: Arc<CircuitBreakerSet>,
        budget: Arc<dyn BudgetManager>,
        history: Arc<dyn UsageHistory>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            retry,
            circuits,
            budget,
            history,
            metrics,
        }
    }

    /// Execute a buffered completion over the chain.
    ///
    /// A link counts as failed only when the retry executor returns an
    /// error; transient retryables are absorbed inside it. Cancellation
    /// aborts the whole chain immediately.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        chain: &[ChainLink],
        request: &CompletionInput,
    ) -> Result<ExecutionOutcome, GatewayError> {
        let mut last_err: Option<GatewayError> = None;
        let mut tried = 0usize;

        for (index, link) in chain.iter().enumerate() {
            let name = link.provider.name().to_string();

            if !self.circuits.can_execute(&name) {
                debug!(provider = %name, "breaker open, skipping chain link");
                continue;
            }

            let mut input = request.clone();
            if link.model.is_some() {
                input.model = link.model.clone();
            }

            debug!(
                provider = %name,
                attempt = index + 1,
                total = chain.len(),
                "trying provider"
            );

            tried += 1;
            let started = Instant::now();
            let result = self
                .retry
                .execute(cancel, &name, || link.provider.complete(&input))
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    self.circuits.record(&name, None);
                    self.metrics.record_request(&name, true, elapsed_ms);
                    self.metrics.record_tokens(
                        &name,
                        response.usage.prompt_tokens as u64,
                        response.usage.completion_tokens as u64,
                    );
                    self.metrics.record_cost(&name, response.cost_usd);
                    self.budget.track(&name, response.cost_usd).await;
                    let _ = self
                        .history
                        .record(
                            &name,
                            response.cost_usd,
                            response.usage.prompt_tokens as u64,
                            response.usage.completion_tokens as u64,
                        )
                        .await;

                    info!(provider = %name, attempt = index + 1, "provider succeeded");
                    return Ok(ExecutionOutcome {
                        response,
                        provider: name,
                        model: input.model,
                        attempt: index + 1,
                    });
                }
                Err(err) => {
                    self.circuits.record(&name, Some(&err));
                    self.metrics.record_request(&name, false, elapsed_ms);

                    if err.is_cancellation() {
                        return Err(GatewayError::Canceled);
                    }

                    warn!(
                        provider = %name,
                        error = %err,
                        remaining = chain.len() - index - 1,
                        "provider failed, trying next in chain"
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(GatewayError::AllProvidersFailed {
            tried,
            last: Box::new(last_err.unwrap_or(GatewayError::NoHealthyProviders)),
        })
    }

    /// Execute a streaming completion over the chain.
    ///
    /// Returns the chunk stream immediately; fallback happens inside the
    /// producer task and is invisible to the consumer as long as no data was
    /// delivered yet.
    pub fn execute_stream(
        &self,
        cancel: CancellationToken,
        chain: Vec<ChainLink>,
        request: CompletionInput,
    ) -> ChunkStream {
        let (tx, rx) = tokio::sync::mpsc::channel::<StreamChunk>(32);

        let circuits = self.circuits.clone();
        let budget = self.budget.clone();
        let history = self.history.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let mut last_failure: Option<StreamChunk> = None;

            for link in chain {
                let name = link.provider.name().to_string();
                if !circuits.can_execute(&name) {
                    debug!(provider = %name, "breaker open, skipping stream link");
                    continue;
                }

                let mut input = request.clone();
                if link.model.is_some() {
                    input.model = link.model.clone();
                }

                let mut stream = match link.provider.complete_stream(&input).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        let gateway_err = GatewayError::Provider(err);
                        circuits.record(&name, Some(&gateway_err));
                        metrics.record_request(&name, false, 0);
                        warn!(provider = %name, error = %gateway_err, "stream open failed, falling back");
                        if let GatewayError::Provider(err) = gateway_err {
                            last_failure = Some(StreamChunk::failed(err));
                        }
                        continue;
                    }
                };

                let mut delivered = false;
                loop {
                    let chunk = tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(provider = %name, "stream canceled by caller");
                            return;
                        }
                        chunk = stream.next() => chunk,
                    };

                    let Some(mut chunk) = chunk else {
                        // Upstream closed without a terminal chunk. With
                        // data already delivered the stream just ends;
                        // otherwise try the next link.
                        if delivered {
                            return;
                        }
                        break;
                    };

                    if let Some(err) = chunk.error.take() {
                        let gateway_err = GatewayError::Provider(err);
                        circuits.record(&name, Some(&gateway_err));
                        metrics.record_request(&name, false, 0);

                        let GatewayError::Provider(err) = gateway_err else {
                            unreachable!()
                        };
                        if delivered {
                            // The client already saw content from this
                            // provider; surface the failure and close.
                            let _ = tx.send(StreamChunk::failed(err)).await;
                            return;
                        }
                        warn!(provider = %name, error = %err, "stream failed before first byte, falling back");
                        last_failure = Some(StreamChunk::failed(err));
                        break;
                    }

                    circuits.record(&name, None);

                    if chunk.done {
                        if let Some(usage) = chunk.usage {
                            let cost = chunk.cost_usd.unwrap_or(0.0);
                            metrics.record_request(&name, true, 0);
                            metrics.record_tokens(
                                &name,
                                usage.prompt_tokens as u64,
                                usage.completion_tokens as u64,
                            );
                            metrics.record_cost(&name, cost);
                            budget.track(&name, cost).await;
                            let _ = history
                                .record(
                                    &name,
                                    cost,
                                    usage.prompt_tokens as u64,
                                    usage.completion_tokens as u64,
                                )
                                .await;
                        }
                        let _ = tx.send(chunk).await;
                        return;
                    }

                    if tx.send(chunk).await.is_err() {
                        // Consumer hung up.
                        return;
                    }
                    delivered = true;
                }
            }

            // Every link failed before delivering data.
            if let Some(failure) = last_failure {
                let _ = tx.send(failure).await;
            }
        });

        ReceiverStream::new(rx).boxed()
    }
}
