//! Backend adapters and their supporting machinery.
//!
//! Each adapter implements the [`crate::traits::ChatProvider`] capability
//! set over its provider's wire API. A shared translation layer
//! ([`translate`]) maps transport failures and HTTP statuses into the error
//! taxonomy so the adapters never hand raw errors to the pipeline, and the
//! [`latency`] decorator feeds the latency tracker without the adapters
//! knowing.

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod latency;
pub mod manager;
pub mod mock;
pub mod openai;
pub(crate) mod sse;
pub mod translate;

pub use anthropic::AnthropicProvider;
pub use factory::ProviderFactory;
pub use gemini::GeminiProvider;
pub use latency::LatencyWatch;
pub use manager::ProviderManager;
pub use mock::{MockOutcome, MockProvider};
pub use openai::OpenAIProvider;
