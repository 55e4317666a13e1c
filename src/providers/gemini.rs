//! Google Gemini adapter (generative language REST API).
//!
//! Gemini's conversation format uses `user`/`model` roles with `parts`
//! arrays; system messages map onto the dedicated `systemInstruction` field.
//! Streaming uses `:streamGenerateContent?alt=sse`, which frames each
//! incremental candidate as an SSE `data:` payload.

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

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    max_tokens: u32,
    catalog: Arc<ModelCatalog>,
    tokenizer: Tokenizer,
}

impl GeminiProvider {
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

    fn build_body(&self, input: &CompletionInput) -> serde_json::Value {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &input.messages {
            match message.role {
                ChatRole::System => system_parts.push(json!({ "text": message.content })),
                ChatRole::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": message.content }],
                })),
                ChatRole::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": message.content }],
                })),
            }
        }

        let mut generation = json!({
            "maxOutputTokens": input.options.max_tokens.unwrap_or(self.max_tokens),
        });
        let config = generation.as_object_mut().expect("config is an object");
        if let Some(temperature) = input.options.temperature {
            config.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = input.options.top_p {
            config.insert("topP".into(), json!(top_p));
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation,
        });
        if !system_parts.is_empty() {
            body.as_object_mut()
                .expect("body is an object")
                .insert("systemInstruction".into(), json!({ "parts": system_parts }));
        }
        body
    }

    async fn send(
        &self,
        api_model: &str,
        action: &str,
        query: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{api_model}:{action}{query}",
            self.base_url
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
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
impl ChatProvider for GeminiProvider {
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
        let body = self.build_body(input);
        let response = self.send(&api_model, "generateContent", "", body).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| translate::transport_error(PROVIDER, e))?;

        let content = parsed.text();
        let usage = parsed
            .usage_metadata
            .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();
        let cost_usd = self
            .catalog
            .cost_for(&model_id, usage.prompt_tokens as usize, usage.completion_tokens as usize)
            .unwrap_or(0.0);

        debug!(
            model = %model_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "gemini completion finished"
        );

        Ok(CompletionResponse::new(content, usage, cost_usd))
    }

    async fn complete_stream(
        &self,
        input: &CompletionInput,
    ) -> Result<ChunkStream, ProviderError> {
        let (model_id, api_model) = self.resolve_model(input)?;
        let body = self.build_body(input);
        let response = self
            .send(&api_model, "streamGenerateContent", "?alt=sse", body)
            .await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamChunk>(32);
        let catalog = self.catalog.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = SseBuffer::new();
            let mut usage = Usage::default();

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
                    let Ok(parsed) = serde_json::from_str::<GenerateResponse>(&event.data) else {
                        continue;
                    };
                    if let Some(meta) = &parsed.usage_metadata {
                        usage =
                            Usage::new(meta.prompt_token_count, meta.candidates_token_count);
                    }
                    let text = parsed.text();
                    if !text.is_empty() && tx.send(StreamChunk::content(text)).await.is_err() {
                        return;
                    }
                }
            }

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
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider() -> GeminiProvider {
        let settings = ProviderSettings {
            name: PROVIDER.to_string(),
            api_key: "g-test".to_string(),
            enabled: true,
            timeout: Duration::from_secs(5),
            default_model: "gemini/gemini-2.5-flash".to_string(),
            max_tokens: 2048,
            requests_per_minute: 0,
            daily_budget: None,
        };
        GeminiProvider::new(&settings, Arc::new(ModelCatalog::new(vec![]))).unwrap()
    }

    #[test]
    fn test_roles_mapped() {
        let p = provider();
        let input = CompletionInput::new(vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);
        let body = p.build_body(&input);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
    }

    #[test]
    fn test_generation_config() {
        let p = provider();
        let mut input = CompletionInput::new(vec![ChatMessage::user("hi")]);
        input.options.temperature = Some(0.3);
        input.options.max_tokens = Some(99);
        let body = p.build_body(&input);

        assert_eq!(body["generationConfig"]["temperature"], 0.3);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 99);
    }

    #[test]
    fn test_resolve_rejects_foreign_model() {
        let p = provider();
        let input = CompletionInput::new(vec![ChatMessage::user("hi")])
            .with_model("openai/gpt-4o-mini");
        assert!(p.resolve_model(&input).is_err());
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "Para"}, {"text": "graph"}], "role": "model"}}],
            "usageMetadata": {"promptTokenCount": 6, "candidatesTokenCount": 3, "totalTokenCount": 9}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "Paragraph");
        assert_eq!(parsed.usage_metadata.unwrap().prompt_token_count, 6);
    }

    #[test]
    fn test_parse_empty_candidates() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.text(), "");
    }
}
