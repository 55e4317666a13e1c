//! Round-robin strategy.
//!
//! An atomic cursor walks the candidate list modulo its length. Breakers are
//! checked again at selection time even though the pipeline already pruned
//! open ones, so a breaker that trips between filtering and selection cannot
//! slip through.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::routing::{RouteStrategy, SelectInput, Selection};

/// Round-robin over the candidate set.
pub struct RoundRobinRouter {
    cursor: AtomicUsize,
}

impl RoundRobinRouter {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteStrategy for RoundRobinRouter {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    async fn select(&self, input: &SelectInput<'_>) -> Result<Selection, GatewayError> {
        let candidates = &input.candidates;
        if candidates.is_empty() {
            return Err(GatewayError::NoAvailable);
        }

        for _ in 0..candidates.len() {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst) % candidates.len();
            let provider = &candidates[index];

            if !input.circuits.can_execute(provider.name()) {
                continue;
            }

            return Ok(Selection {
                provider: provider.clone(),
                model: None,
                candidates: Vec::new(),
            });
        }

        Err(GatewayError::NoAvailable)
    }
}
