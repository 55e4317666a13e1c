//! modelrelay - Request-Routing Gateway for LLM Backends
//!
//! A gateway that sits between client applications and multiple LLM
//! backends. For each inbound chat-completion request it selects one
//! provider from the configured pool, issues the upstream call (buffered or
//! streaming), and surfaces the result with uniform error and observability
//! semantics. When the chosen provider fails, a fallback chain of alternates
//! runs under retry and circuit-breaker control.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  request {messages, tier?, stream?}                           │
//! │        │                                                      │
//! │        ▼                                                      │
//! │  PipelineRouter ── breaker prune ── budget ── rate ── semantic│
//! │        │                                                      │
//! │        ▼                                                      │
//! │  RouteStrategy (round-robin | weighted | latency | cost)      │
//! │        │                                                      │
//! │        ▼                                                      │
//! │  build_chain ── primary + deduplicated fallbacks              │
//! │        │                                                      │
//! │        ▼                                                      │
//! │  FallbackExecutor ── RetryExecutor ── CircuitBreaker          │
//! │        │                   │                                  │
//! │        ▼                   ▼                                  │
//! │  BudgetManager · UsageHistory · LatencyTracker · Metrics      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Providers
//!
//! | Provider | Chat | Streaming | Notes |
//! |----------|------|-----------|-------|
//! | OpenAI | ✓ | ✓ | chat-completions API |
//! | Anthropic | ✓ | ✓ | messages API |
//! | Gemini | ✓ | ✓ | generative language REST API |
//! | Mock | ✓ | ✓ | scripted outcomes for tests |
//!
//! # Example
//!
//! ```ignore
//! use modelrelay::app::{App, SingleTenantResolver};
//! use modelrelay::config::GatewayConfig;
//! use modelrelay::metrics::GatewayMetrics;
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::load()?;
//! let metrics = Arc::new(GatewayMetrics::new());
//! let app = App::build(config, metrics).await?;
//! let resolver = Arc::new(SingleTenantResolver::new(app));
//! modelrelay::server::serve(resolver, "0.0.0.0:8080").await?;
//! ```

pub mod app;
pub mod catalog;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod providers;
pub mod resilience;
pub mod routing;
pub mod server;
pub mod tokenizer;
pub mod traits;

pub use app::{App, SingleTenantResolver, TenantResolver};
pub use catalog::{ModelCatalog, ModelInfo, ModelTier};
pub use chain::{build_chain, ChainLink, ExecutionOutcome, FallbackExecutor};
pub use config::GatewayConfig;
pub use error::{ErrorKind, GatewayError, ProviderError, Result};
pub use metrics::GatewayMetrics;
pub use providers::{
    AnthropicProvider, GeminiProvider, MockProvider, OpenAIProvider, ProviderFactory,
    ProviderManager,
};
pub use resilience::{CircuitBreaker, CircuitBreakerSet, CircuitState, RetryExecutor};
pub use routing::{
    BudgetManager, InMemoryBudgetManager, InMemoryRateLimitManager, InMemoryUsageHistory,
    LatencyRouter, LatencyTracker, PipelineRouter, RateLimitManager, RouteStrategy, SelectInput,
    Selection, UsageHistory, UsageStats,
};
pub use tokenizer::Tokenizer;
pub use traits::{
    ChatMessage, ChatProvider, ChatRole, ChunkStream, CompletionInput, CompletionOptions,
    CompletionResponse, StreamChunk, Usage,
};
