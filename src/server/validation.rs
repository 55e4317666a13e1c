//! Completion request parsing and validation.
//!
//! Bounds: 1–100 messages, each role ∈ {user, assistant, system}, content
//! 1–500 000 characters, first message from user or system, total content at
//! most 1 MB, temperature 0–2, top_p 0–1, penalties -2–2, max_tokens up to
//! 100 000, tier one of the four bands.

use serde::Deserialize;

use crate::catalog::ModelTier;
use crate::traits::{ChatMessage, ChatRole, CompletionOptions};

const MAX_MESSAGES: usize = 100;
const MAX_CONTENT_CHARS: usize = 500_000;
const MAX_TOTAL_BYTES: usize = 1_000_000;
const MAX_OUTPUT_TOKENS: u32 = 100_000;

/// Raw `POST /v1/chat/completions` body.
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub tier: Option<String>,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub top_p: Option<f64>,

    #[serde(default)]
    pub frequency_penalty: Option<f64>,

    #[serde(default)]
    pub presence_penalty: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub role: String,

    #[serde(default)]
    pub content: String,
}

/// Everything downstream needs from a validated request.
#[derive(Debug)]
pub struct ValidRequest {
    pub messages: Vec<ChatMessage>,
    pub tier: Option<ModelTier>,
    pub options: CompletionOptions,
    pub stream: bool,
    pub model: Option<String>,
}

/// Validate the raw body; the error string is client-facing.
pub fn validate(request: CompletionRequest) -> Result<ValidRequest, String> {
    if request.messages.is_empty() {
        return Err("messages is required and must not be empty".to_string());
    }
    if request.messages.len() > MAX_MESSAGES {
        return Err(format!("too many messages (max {MAX_MESSAGES})"));
    }

    let mut messages = Vec::with_capacity(request.messages.len());
    let mut total_bytes = 0usize;

    for (index, message) in request.messages.iter().enumerate() {
        let role = match message.role.as_str() {
            "user" => ChatRole::User,
            "assistant" => ChatRole::Assistant,
            "system" => ChatRole::System,
            other => {
                return Err(format!(
                    "message {index}: invalid role '{other}' (expected user, assistant or system)"
                ))
            }
        };

        let chars = message.content.chars().count();
        if chars == 0 {
            return Err(format!("message {index}: content must not be empty"));
        }
        if chars > MAX_CONTENT_CHARS {
            return Err(format!(
                "message {index}: content too long (max {MAX_CONTENT_CHARS} characters)"
            ));
        }

        total_bytes += message.content.len();
        messages.push(ChatMessage {
            role,
            content: message.content.clone(),
        });
    }

    if total_bytes > MAX_TOTAL_BYTES {
        return Err("total message content too large (max 1MB)".to_string());
    }

    match messages[0].role {
        ChatRole::User | ChatRole::System => {}
        ChatRole::Assistant => {
            return Err("first message must be from user or system".to_string())
        }
    }

    if let Some(temperature) = request.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err("temperature must be between 0 and 2".to_string());
        }
    }
    if let Some(top_p) = request.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err("top_p must be between 0 and 1".to_string());
        }
    }
    for (name, value) in [
        ("frequency_penalty", request.frequency_penalty),
        ("presence_penalty", request.presence_penalty),
    ] {
        if let Some(value) = value {
            if !(-2.0..=2.0).contains(&value) {
                return Err(format!("{name} must be between -2 and 2"));
            }
        }
    }
    if let Some(max_tokens) = request.max_tokens {
        if max_tokens == 0 || max_tokens > MAX_OUTPUT_TOKENS {
            return Err(format!(
                "max_tokens must be between 1 and {MAX_OUTPUT_TOKENS}"
            ));
        }
    }

    let tier = match &request.tier {
        Some(raw) => Some(
            raw.parse::<ModelTier>()
                .map_err(|_| format!("invalid tier '{raw}'"))?,
        ),
        None => None,
    };

    Ok(ValidRequest {
        messages,
        tier,
        options: CompletionOptions {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        },
        stream: request.stream,
        model: request.model.filter(|m| !m.is_empty()),
    })
}
