//! Latency-observing provider decorator.
//!
//! Wraps any adapter and feeds observed call latencies into the shared
//! [`LatencyTracker`] without the adapter knowing. Buffered calls record
//! their full duration; streaming calls record the stream-open latency (the
//! dominant share of perceived responsiveness). Failed calls record nothing,
//! so error paths cannot poison the score.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::routing::latency::LatencyTracker;
use crate::traits::{
    ChatMessage, ChatProvider, ChunkStream, CompletionInput, CompletionResponse,
};

/// Transparent decorator feeding the latency tracker.
pub struct LatencyWatch {
    inner: Arc<dyn ChatProvider>,
    tracker: Arc<LatencyTracker>,
}

impl LatencyWatch {
    pub fn new(inner: Arc<dyn ChatProvider>, tracker: Arc<LatencyTracker>) -> Self {
        Self { inner, tracker }
    }
}

#[async_trait]
impl ChatProvider for LatencyWatch {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn complete(
        &self,
        input: &CompletionInput,
    ) -> Result<CompletionResponse, ProviderError> {
        let start = Instant::now();
        let result = self.inner.complete(input).await;
        if result.is_ok() {
            self.tracker
                .record(self.inner.name(), start.elapsed().as_secs_f64() * 1000.0);
        }
        result
    }

    async fn complete_stream(
        &self,
        input: &CompletionInput,
    ) -> Result<ChunkStream, ProviderError> {
        let start = Instant::now();
        let result = self.inner.complete_stream(input).await;
        if result.is_ok() {
            self.tracker
                .record(self.inner.name(), start.elapsed().as_secs_f64() * 1000.0);
        }
        result
    }

    async fn count_tokens(&self, messages: &[ChatMessage]) -> Result<usize, ProviderError> {
        self.inner.count_tokens(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    #[tokio::test]
    async fn test_success_records_latency() {
        let tracker = Arc::new(LatencyTracker::new());
        let mock = Arc::new(MockProvider::new("timed"));
        mock.push_reply("ok");
        let watched = LatencyWatch::new(mock, tracker.clone());

        let input = CompletionInput::new(vec![ChatMessage::user("hi")]);
        watched.complete(&input).await.unwrap();
        assert!(tracker.score("timed") >= 0.0);
        assert!(tracker.has_score("timed"));
    }

    #[tokio::test]
    async fn test_failure_records_nothing() {
        let tracker = Arc::new(LatencyTracker::new());
        let mock = Arc::new(MockProvider::new("failing"));
        mock.push_failure(ProviderError::server("failing", 500));
        let watched = LatencyWatch::new(mock, tracker.clone());

        let input = CompletionInput::new(vec![ChatMessage::user("hi")]);
        assert!(watched.complete(&input).await.is_err());
        assert!(!tracker.has_score("failing"));
    }

    #[tokio::test]
    async fn test_delegation() {
        let tracker = Arc::new(LatencyTracker::new());
        let mock = Arc::new(MockProvider::new("inner"));
        let watched = LatencyWatch::new(mock, tracker);
        assert_eq!(watched.name(), "inner");
        assert_eq!(watched.default_model(), "inner/mock-model");
    }
}
