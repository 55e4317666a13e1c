//! Scripted mock provider for tests.
//!
//! Outcomes are queued ahead of time and consumed call by call, so routing,
//! retry, breaker and fallback behavior can be exercised deterministically
//! without network access. An exhausted queue yields a fixed default reply.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::ProviderError;
use crate::traits::{
    ChatMessage, ChatProvider, ChunkStream, CompletionInput, CompletionResponse, StreamChunk,
    Usage,
};

/// One scripted call outcome.
#[derive(Debug)]
pub enum MockOutcome {
    /// A successful buffered reply (streams deliver it as one content chunk
    /// plus a terminal chunk).
    Reply {
        content: String,
        usage: Usage,
        cost_usd: f64,
    },

    /// The call (or stream open) fails.
    Fail(ProviderError),

    /// A stream delivering exactly these chunks.
    Stream(Vec<StreamChunk>),
}

/// Deterministic mock implementation of [`ChatProvider`].
pub struct MockProvider {
    name: String,
    default_model: String,
    outcomes: Mutex<VecDeque<MockOutcome>>,
    calls: AtomicUsize,
    /// Simulated call duration, for latency-routing tests.
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            default_model: format!("{name}/mock-model"),
            name,
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Make every call take roughly `delay` of (tokio) time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a successful reply with fixed usage and cost.
    pub fn push_reply(&self, content: impl Into<String>) {
        self.push(MockOutcome::Reply {
            content: content.into(),
            usage: Usage::new(10, 5),
            cost_usd: 0.001,
        });
    }

    /// Queue a successful reply with explicit usage and cost.
    pub fn push_reply_with(&self, content: impl Into<String>, usage: Usage, cost_usd: f64) {
        self.push(MockOutcome::Reply {
            content: content.into(),
            usage,
            cost_usd,
        });
    }

    /// Queue a failure.
    pub fn push_failure(&self, error: ProviderError) {
        self.push(MockOutcome::Fail(error));
    }

    /// Queue a scripted stream.
    pub fn push_stream(&self, chunks: Vec<StreamChunk>) {
        self.push(MockOutcome::Stream(chunks));
    }

    pub fn push(&self, outcome: MockOutcome) {
        self.outcomes
            .lock()
            .expect("mock queue poisoned")
            .push_back(outcome);
    }

    /// Number of calls made so far (completions + stream opens).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .expect("mock queue poisoned")
            .pop_front()
            .unwrap_or(MockOutcome::Reply {
                content: "mock response".to_string(),
                usage: Usage::new(10, 5),
                cost_usd: 0.001,
            })
    }

    async fn simulate_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        _input: &CompletionInput,
    ) -> Result<CompletionResponse, ProviderError> {
        self.simulate_delay().await;
        match self.next_outcome() {
            MockOutcome::Reply {
                content,
                usage,
                cost_usd,
            } => Ok(CompletionResponse::new(content, usage, cost_usd)),
            MockOutcome::Fail(err) => Err(err),
            MockOutcome::Stream(_) => Err(ProviderError::validation(
                &self.name,
                "scripted stream outcome consumed by buffered call",
            )),
        }
    }

    async fn complete_stream(
        &self,
        _input: &CompletionInput,
    ) -> Result<ChunkStream, ProviderError> {
        self.simulate_delay().await;
        match self.next_outcome() {
            MockOutcome::Stream(chunks) => Ok(futures::stream::iter(chunks).boxed()),
            MockOutcome::Reply {
                content,
                usage,
                cost_usd,
            } => {
                let chunks = vec![
                    StreamChunk::content(content),
                    StreamChunk::finished(usage, cost_usd),
                ];
                Ok(futures::stream::iter(chunks).boxed())
            }
            MockOutcome::Fail(err) => Err(err),
        }
    }

    async fn count_tokens(&self, messages: &[ChatMessage]) -> Result<usize, ProviderError> {
        // Rough chars/4 heuristic keeps cost-router tests deterministic.
        Ok(messages
            .iter()
            .map(|m| m.content.chars().count() / 4 + 1)
            .sum())
    }
}
