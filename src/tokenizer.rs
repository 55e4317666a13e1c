//! Local token counting for cost estimation.
//!
//! Adapters estimate prompt tokens without network round-trips; the cost
//! router calls `count_tokens` on every candidate, so this must stay cheap
//! and purely local. Unknown models fall back to cl100k_base.

use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

use crate::traits::ChatMessage;

/// Fixed per-message framing overhead, mirroring the OpenAI chat format
/// (role + separators).
const TOKENS_PER_MESSAGE: usize = 4;

/// Tokenizer for counting tokens in chat messages.
pub struct Tokenizer {
    encoder: CoreBPE,
    model: String,
}

impl Tokenizer {
    /// Create a tokenizer for a specific model ID.
    ///
    /// The encoder is selected from the model name; anything unrecognized
    /// uses cl100k_base, which is close enough for routing estimates.
    pub fn for_model(model: &str) -> Self {
        let encoder = match model {
            m if m.contains("gpt-5") || m.contains("gpt-4o") => {
                o200k_base().expect("o200k tokenizer data is bundled")
            }
            _ => cl100k_base().expect("cl100k tokenizer data is bundled"),
        };

        Self {
            encoder,
            model: model.to_string(),
        }
    }

    /// Count the number of tokens in a text fragment.
    pub fn count_text(&self, text: &str) -> usize {
        self.encoder.encode_with_special_tokens(text).len()
    }

    /// Count the tokens of a full message sequence, including per-message
    /// framing overhead.
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| self.count_text(&m.content) + TOKENS_PER_MESSAGE)
            .sum()
    }

    /// The model this tokenizer was built for.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::for_model("default")
    }
}
