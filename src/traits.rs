//! Core request/response types and the provider capability trait.
//!
//! # Trait-based provider abstraction
//!
//! All backend adapters implement a single [`ChatProvider`] capability set:
//! buffered completion, streaming completion, local token counting, and a
//! name. Variants differ only in how they implement these four methods, so
//! the routing pipeline, filters, breakers and the fallback executor are
//! provider-agnostic, and tests run against a scripted mock.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

// ============================================================================
// Messages
// ============================================================================

/// Role of a chat message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System message for setting context.
    System,
    /// User input message.
    User,
    /// Assistant response message.
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: ChatRole,

    /// Content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Completion Input
// ============================================================================

/// Sampling and length options forwarded to the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Temperature for sampling (0.0 = deterministic, 2.0 = most random).
    pub temperature: Option<f64>,

    /// Top-p (nucleus) sampling.
    pub top_p: Option<f64>,

    /// Frequency penalty.
    pub frequency_penalty: Option<f64>,

    /// Presence penalty.
    pub presence_penalty: Option<f64>,
}

/// A single upstream completion call.
///
/// `model` is a registry ID (`"<provider>/<model>"`); when absent the
/// adapter falls back to its configured default model.
#[derive(Debug, Clone)]
pub struct CompletionInput {
    /// Registry model ID to use, when the router bound one.
    pub model: Option<String>,

    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,

    /// Sampling options.
    pub options: CompletionOptions,
}

impl CompletionInput {
    /// Create an input using the adapter's default model.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            options: CompletionOptions::default(),
        }
    }

    /// Bind a specific registry model ID.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set sampling options.
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }
}

// ============================================================================
// Completion Output
// ============================================================================

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A buffered completion response.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    /// The assistant message produced by the model.
    pub message: ChatMessage,

    /// Token accounting for the call.
    pub usage: Usage,

    /// Cost of the call in USD, priced from the model catalog.
    pub cost_usd: f64,

    /// Interesting upstream response headers (request IDs and the like).
    #[serde(skip)]
    pub headers: HashMap<String, String>,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>, usage: Usage, cost_usd: f64) -> Self {
        Self {
            message: ChatMessage::assistant(content),
            usage,
            cost_usd,
            headers: HashMap::new(),
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// One unit of a streaming completion.
///
/// A terminal chunk has `done == true` and may carry final `usage` and
/// `cost_usd`. A chunk with `error` set ends the stream; the error field is
/// never serialized to clients (the SSE layer frames it separately).
#[derive(Debug, Default, Serialize)]
pub struct StreamChunk {
    /// Partial content text.
    pub content: String,

    /// True on the final chunk of the stream.
    pub done: bool,

    /// Terminal error, when the stream failed.
    #[serde(skip)]
    pub error: Option<ProviderError>,

    /// Final token accounting, attached to the terminal chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Final cost in USD, attached to the terminal chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl StreamChunk {
    /// A content chunk.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::default()
        }
    }

    /// The terminal chunk, carrying final usage and cost.
    pub fn finished(usage: Usage, cost_usd: f64) -> Self {
        Self {
            done: true,
            usage: Some(usage),
            cost_usd: Some(cost_usd),
            ..Self::default()
        }
    }

    /// A terminal error chunk.
    pub fn failed(error: ProviderError) -> Self {
        Self {
            done: true,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Boxed chunk stream returned by `complete_stream`.
pub type ChunkStream = BoxStream<'static, StreamChunk>;

// ============================================================================
// Provider Trait
// ============================================================================

/// Capability set implemented by every backend adapter.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Lower-cased provider name (`"openai"`, `"anthropic"`, ...).
    ///
    /// Must match the `<provider>/` prefix of every model ID the adapter
    /// accepts.
    fn name(&self) -> &str;

    /// Registry ID of the model used when the input does not bind one.
    fn default_model(&self) -> &str;

    /// Perform a buffered completion.
    async fn complete(&self, input: &CompletionInput)
        -> Result<CompletionResponse, ProviderError>;

    /// Open a streaming completion.
    ///
    /// Errors opening the stream are returned directly; errors mid-stream
    /// arrive as a terminal [`StreamChunk`] with `error` set.
    async fn complete_stream(&self, input: &CompletionInput)
        -> Result<ChunkStream, ProviderError>;

    /// Count prompt tokens locally (tokenizer lookup, no network I/O).
    async fn count_tokens(&self, messages: &[ChatMessage]) -> Result<usize, ProviderError>;
}

impl std::fmt::Debug for dyn ChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatProvider").field("name", &self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_lowercase() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"user""#));

        let parsed: ChatMessage = serde_json::from_str(r#"{"role":"system","content":"x"}"#).unwrap();
        assert_eq!(parsed.role, ChatRole::System);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result = serde_json::from_str::<ChatMessage>(r#"{"role":"tool","content":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_usage_totals() {
        let usage = Usage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_input_builder() {
        let input = CompletionInput::new(vec![ChatMessage::user("hi")])
            .with_model("openai/gpt-4o-mini")
            .with_options(CompletionOptions {
                temperature: Some(0.2),
                ..Default::default()
            });
        assert_eq!(input.model.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(input.options.temperature, Some(0.2));
    }

    #[test]
    fn test_chunk_error_not_serialized() {
        let chunk = StreamChunk::failed(crate::error::ProviderError::server("openai", 500));
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("error"));
        assert!(json.contains(r#""done":true"#));
    }

    #[test]
    fn test_finished_chunk_carries_usage_and_cost() {
        let chunk = StreamChunk::finished(Usage::new(10, 5), 0.0015);
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("usage"));
        assert!(json.contains("cost_usd"));
    }

    #[test]
    fn test_content_chunk_omits_optionals() {
        let chunk = StreamChunk::content("hello");
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("usage"));
        assert!(!json.contains("cost_usd"));
    }
}
