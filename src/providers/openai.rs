//! OpenAI chat-completions adapter.

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
    ChatMessage, ChatProvider, ChunkStream, CompletionInput, CompletionResponse, StreamChunk,
    Usage,
};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider speaking the chat-completions API.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    max_tokens: u32,
    catalog: Arc<ModelCatalog>,
    tokenizer: Tokenizer,
}

impl OpenAIProvider {
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

    /// Point the adapter at a compatible endpoint. Test seam.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Resolve the registry model ID and its wire-level name.
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
        let messages: Vec<serde_json::Value> = input
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": api_model,
            "messages": messages,
            "max_tokens": input.options.max_tokens.unwrap_or(self.max_tokens),
        });

        let object = body.as_object_mut().expect("body is an object");
        if let Some(temperature) = input.options.temperature {
            object.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = input.options.top_p {
            object.insert("top_p".into(), json!(top_p));
        }
        if let Some(penalty) = input.options.frequency_penalty {
            object.insert("frequency_penalty".into(), json!(penalty));
        }
        if let Some(penalty) = input.options.presence_penalty {
            object.insert("presence_penalty".into(), json!(penalty));
        }
        if stream {
            object.insert("stream".into(), json!(true));
            object.insert("stream_options".into(), json!({ "include_usage": true }));
        }

        body
    }

    async fn send(
        &self,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
impl ChatProvider for OpenAIProvider {
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
        let request_id = header_value(response.headers(), "x-request-id");

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| translate::transport_error(PROVIDER, e))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| {
                ProviderError::new(
                    crate::error::ErrorKind::Unknown,
                    PROVIDER,
                    "no choices in response",
                )
            })?;

        let usage = parsed
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let cost_usd = self
            .catalog
            .cost_for(&model_id, usage.prompt_tokens as usize, usage.completion_tokens as usize)
            .unwrap_or(0.0);

        debug!(
            model = %model_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "openai completion finished"
        );

        let mut response = CompletionResponse::new(content, usage, cost_usd);
        if let Some(id) = request_id {
            response.headers.insert("x-request-id".to_string(), id);
        }
        Ok(response)
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
            let mut usage: Option<Usage> = None;

            let finish = |usage: Option<Usage>| {
                let usage = usage.unwrap_or_default();
                let cost = catalog
                    .cost_for(
                        &model_id,
                        usage.prompt_tokens as usize,
                        usage.completion_tokens as usize,
                    )
                    .unwrap_or(0.0);
                StreamChunk::finished(usage, cost)
            };

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
                    let data = event.data.trim();
                    if data == "[DONE]" {
                        let _ = tx.send(finish(usage)).await;
                        return;
                    }

                    let Ok(parsed) = serde_json::from_str::<StreamEvent>(data) else {
                        continue;
                    };
                    if let Some(u) = parsed.usage {
                        usage = Some(Usage::new(u.prompt_tokens, u.completion_tokens));
                    }
                    if let Some(text) = parsed
                        .choices
                        .first()
                        .and_then(|c| c.delta.content.clone())
                    {
                        if !text.is_empty() && tx.send(StreamChunk::content(text)).await.is_err() {
                            // Consumer hung up; stop reading.
                            return;
                        }
                    }
                }
            }

            let _ = tx.send(finish(usage)).await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn count_tokens(&self, messages: &[ChatMessage]) -> Result<usize, ProviderError> {
        Ok(self.tokenizer.count_messages(messages))
    }
}

fn header_value(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider() -> OpenAIProvider {
        let settings = ProviderSettings {
            name: PROVIDER.to_string(),
            api_key: "sk-test".to_string(),
            enabled: true,
            timeout: Duration::from_secs(5),
            default_model: "openai/gpt-4o-mini".to_string(),
            max_tokens: 2048,
            requests_per_minute: 0,
            daily_budget: None,
        };
        OpenAIProvider::new(&settings, Arc::new(ModelCatalog::new(vec![]))).unwrap()
    }

    fn input() -> CompletionInput {
        CompletionInput::new(vec![ChatMessage::user("hello")])
    }

    #[test]
    fn test_resolve_default_model() {
        let p = provider();
        let (id, api_model) = p.resolve_model(&input()).unwrap();
        assert_eq!(id, "openai/gpt-4o-mini");
        assert_eq!(api_model, "gpt-4o-mini");
    }

    #[test]
    fn test_resolve_bound_model() {
        let p = provider();
        let (id, api_model) = p
            .resolve_model(&input().with_model("openai/gpt-4o"))
            .unwrap();
        assert_eq!(id, "openai/gpt-4o");
        assert_eq!(api_model, "gpt-4o");
    }

    #[test]
    fn test_resolve_rejects_foreign_model() {
        let p = provider();
        let err = p
            .resolve_model(&input().with_model("anthropic/claude-haiku-3"))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_body_defaults() {
        let p = provider();
        let body = p.build_body("gpt-4o-mini", &input(), false);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 2048);
        assert!(body.get("temperature").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_body_options_and_stream() {
        let p = provider();
        let mut request = input();
        request.options.temperature = Some(0.7);
        request.options.top_p = Some(0.9);
        request.options.max_tokens = Some(100);

        let body = p.build_body("gpt-4o-mini", &request, true);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "choices": [{"message": {"content": "hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi there"));
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_parse_stream_event() {
        let raw = r#"{"choices":[{"delta":{"content":"par"},"index":0}]}"#;
        let parsed: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("par"));

        let usage_only = r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":21}}"#;
        let parsed: StreamEvent = serde_json::from_str(usage_only).unwrap();
        assert_eq!(parsed.usage.unwrap().completion_tokens, 21);
    }

    #[tokio::test]
    async fn test_count_tokens_local() {
        let p = provider();
        let count = p
            .count_tokens(&[ChatMessage::user("Hello, world!")])
            .await
            .unwrap();
        assert!(count > 0);
    }
}
