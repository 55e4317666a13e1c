//! Anthropic messages-API adapter.
//!
//! System messages are lifted into the request's `system` field, the rest of
//! the conversation maps onto alternating `user`/`assistant` turns. Streaming
//! responses arrive as typed SSE events: `message_start` carries the input
//! token count, `content_block_delta` the text, `message_delta` the final
//! output token count.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::catalog::{split_model_id, ModelCatalog};
use crate::config::ProviderSettings;
use crate::error::{GatewayError, ProviderError};
use crate::providers::sse::SseBuffer;
use crate::providers::translate;
use crate::tokenizer::Tokenizer;
use crate::traits::{
    ChatMessage, ChatProvider, ChatRole, ChunkStream, CompletionInput, CompletionResponse,
    StreamChunk, Usage,
};

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic (Claude) provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    max_tokens: u32,
    catalog: Arc<ModelCatalog>,
    tokenizer: Tokenizer,
}

impl AnthropicProvider {
    pub fn new(settings: &ProviderSettings, catalog: Arc<ModelCatalog>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: settings.default_model.clone(),
            max_tokens: settings.max_tokens,
            catalog,
            tokenizer: Tokenizer::for_model(&settings.default_model),
        })
    }

    /// Point the adapter at a different endpoint. Test seam.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn resolve_model(&self, input: &CompletionInput) -> Result<(String, String), ProviderError> {
        let id = input
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let (provider, api_model) = split_model_id(&id)
            .map_err(|_| ProviderError::validation(PROVIDER, format!("invalid model ID: {id}")))?;
        if provider != PROVIDER {
            return Err(ProviderError::validation(
                PROVIDER,
                format!("model {id} does not belong to provider {PROVIDER}"),
            ));
        }
        let api_model = api_model.to_string();
        Ok((id, api_model))
    }

    fn build_body(&self, api_model: &str, input: &CompletionInput, stream: bool) -> serde_json::Value {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for message in &input.messages {
            match message.role {
                ChatRole::System => system_parts.push(message.content.clone()),
                ChatRole::User | ChatRole::Assistant => messages.push(json!({
                    "role": message.role.as_str(),
                    "content": message.content,
                })),
            }
        }

        let mut body = json!({
            "model": api_model,
            "messages": messages,
            "max_tokens": input.options.max_tokens.unwrap_or(self.max_tokens),
        });

        let object = body.as_object_mut().expect("body is an object");
        if !system_parts.is_empty() {
            object.insert("system".into(), json!(system_parts.join("\n\n")));
        }
        if let Some(temperature) = input.options.temperature {
            object.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = input.options.top_p {
            object.insert("top_p".into(), json!(top_p));
        }
        if stream {
            object.insert("stream".into(), json!(true));
        }

        body
    }

    async fn send(&self, body: serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| translate::transport_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(translate::status_error(PROVIDER, status.as_u16(), &text, &headers));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        input: &CompletionInput,
    ) -> Result<CompletionResponse, ProviderError> {
        let (model_id, api_model) = self.resolve_model(input)?;
        let body = self.build_body(&api_model, input, false);
        let response = self.send(body).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| translate::transport_error(PROVIDER, e))?;

        let content = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let usage = Usage::new(parsed.usage.input_tokens, parsed.usage.output_tokens);
        let cost_usd = self
            .catalog
            .cost_for(&model_id, usage.prompt_tokens as usize, usage.completion_tokens as usize)
            .unwrap_or(0.0);

        debug!(
            model = %model_id,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "anthropic completion finished"
        );

        Ok(CompletionResponse::new(content, usage, cost_usd))
    }

    async fn complete_stream(
        &self,
        input: &CompletionInput,
    ) -> Result<ChunkStream, ProviderError> {
        let (model_id, api_model) = self.resolve_model(input)?;
        let body = self.build_body(&api_model, input, true);
        let response = self.send(body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamChunk>(32);
        let catalog = self.catalog.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = SseBuffer::new();
            let mut input_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;

            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx
                            .send(StreamChunk::failed(translate::transport_error(PROVIDER, err)))
                            .await;
                        return;
                    }
                };

                for event in buffer.push(&chunk) {
                    let Ok(parsed) = serde_json::from_str::<StreamEvent>(&event.data) else {
                        continue;
                    };

                    match parsed.kind.as_str() {
                        "message_start" => {
                            if let Some(message) = parsed.message {
                                input_tokens = message.usage.input_tokens;
                            }
                        }
                        "content_block_delta" => {
                            if let Some(text) =
                                parsed.delta.as_ref().and_then(|d| d.text.clone())
                            {
                                if tx.send(StreamChunk::content(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        "message_delta" => {
                            if let Some(usage) = parsed.usage {
                                output_tokens = usage.output_tokens;
                            }
                        }
                        "error" => {
                            let message = parsed
                                .error
                                .map(|e| e.message)
                                .unwrap_or_else(|| "stream error".to_string());
                            let _ = tx
                                .send(StreamChunk::failed(ProviderError::new(
                                    crate::error::ErrorKind::ServerError,
                                    PROVIDER,
                                    message,
                                )))
                                .await;
                            return;
                        }
                        "message_stop" => {
                            let usage = Usage::new(input_tokens, output_tokens);
                            let cost = catalog
                                .cost_for(
                                    &model_id,
                                    usage.prompt_tokens as usize,
                                    usage.completion_tokens as usize,
                                )
                                .unwrap_or(0.0);
                            let _ = tx.send(StreamChunk::finished(usage, cost)).await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            // Stream ended without message_stop; still emit a terminal chunk.
            let usage = Usage::new(input_tokens, output_tokens);
            let cost = catalog
                .cost_for(
                    &model_id,
                    usage.prompt_tokens as usize,
                    usage.completion_tokens as usize,
                )
                .unwrap_or(0.0);
            let _ = tx.send(StreamChunk::finished(usage, cost)).await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn count_tokens(&self, messages: &[ChatMessage]) -> Result<usize, ProviderError> {
        Ok(self.tokenizer.count_messages(messages))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    message: Option<StreamMessage>,
    delta: Option<StreamDelta>,
    usage: Option<ApiUsage>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider() -> AnthropicProvider {
        let settings = ProviderSettings {
            name: PROVIDER.to_string(),
            api_key: "test-key".to_string(),
            enabled: true,
            timeout: Duration::from_secs(5),
            default_model: "anthropic/claude-haiku-3".to_string(),
            max_tokens: 1024,
            requests_per_minute: 0,
            daily_budget: None,
        };
        AnthropicProvider::new(&settings, Arc::new(ModelCatalog::new(vec![]))).unwrap()
    }

    #[test]
    fn test_system_messages_lifted() {
        let p = provider();
        let input = CompletionInput::new(vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("bye"),
        ]);
        let body = p.build_body("claude-haiku-3", &input, false);

        assert_eq!(body["system"], "You are terse.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_multiple_system_messages_joined() {
        let p = provider();
        let input = CompletionInput::new(vec![
            ChatMessage::system("A"),
            ChatMessage::system("B"),
            ChatMessage::user("hi"),
        ]);
        let body = p.build_body("claude-haiku-3", &input, false);
        assert_eq!(body["system"], "A\n\nB");
    }

    #[test]
    fn test_max_tokens_always_present() {
        let p = provider();
        let input = CompletionInput::new(vec![ChatMessage::user("hi")]);
        let body = p.build_body("claude-haiku-3", &input, false);
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn test_resolve_rejects_foreign_model() {
        let p = provider();
        let input =
            CompletionInput::new(vec![ChatMessage::user("hi")]).with_model("openai/gpt-4o");
        assert!(p.resolve_model(&input).is_err());
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " world"}],
            "usage": {"input_tokens": 8, "output_tokens": 2},
            "stop_reason": "end_turn"
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "Hello world");
        assert_eq!(parsed.usage.input_tokens, 8);
    }

    #[test]
    fn test_parse_stream_events() {
        let start = r#"{"type":"message_start","message":{"usage":{"input_tokens":14,"output_tokens":0}}}"#;
        let parsed: StreamEvent = serde_json::from_str(start).unwrap();
        assert_eq!(parsed.kind, "message_start");
        assert_eq!(parsed.message.unwrap().usage.input_tokens, 14);

        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        let parsed: StreamEvent = serde_json::from_str(delta).unwrap();
        assert_eq!(parsed.delta.unwrap().text.as_deref(), Some("Hi"));

        let finish = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#;
        let parsed: StreamEvent = serde_json::from_str(finish).unwrap();
        assert_eq!(parsed.usage.unwrap().output_tokens, 42);
    }
}
