//! Error taxonomy for provider calls and routing decisions.
//!
//! # Two layers
//!
//! Every backend adapter translates its native failures into a single
//! [`ProviderError`] shape carrying an [`ErrorKind`] and a `retryable` flag.
//! The rest of the system never inspects provider-specific payloads: the
//! retry executor reads `retryable`, the circuit breaker reads the kind, the
//! HTTP layer reads the status code.
//!
//! [`GatewayError`] is the routing-level layer: selection failures (empty
//! candidate sets, drained filters), retry exhaustion, and the terminal
//! all-providers-failed outcome of a fallback chain.
//!
//! # Retryable set
//!
//! | Kind | Retryable |
//! |------|-----------|
//! | `RateLimit`, `ServerError`, `NetworkError`, `Unavailable` | yes |
//! | `Authentication`, `Validation`, `NotFound`, `QuotaExceeded` | no |
//! | `Canceled`, `Timeout`, `Unknown` | no |
//!
//! `Timeout` is treated as fatal for a provider attempt to avoid duplicate
//! charges on a request that may have been accepted upstream.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the routing pipeline.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

// ============================================================================
// Error Kinds
// ============================================================================

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid or missing API key, or insufficient permissions.
    Authentication,
    /// The request was rejected as malformed (4xx semantic failure).
    Validation,
    /// Model or resource does not exist.
    NotFound,
    /// Account-level quota exhausted.
    QuotaExceeded,
    /// The caller canceled the request.
    Canceled,
    /// The upstream call timed out.
    Timeout,
    /// Provider-side rate limiting (429).
    RateLimit,
    /// 5xx response from the provider.
    ServerError,
    /// Transport-level failure (DNS, connect, TLS, broken body).
    NetworkError,
    /// Provider declared itself temporarily unavailable.
    Unavailable,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Stable snake_case label, used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether errors of this kind are retried by default.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::NetworkError
                | ErrorKind::Unavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Provider Errors
// ============================================================================

/// A classified failure from a single provider call.
#[derive(Debug, Error)]
#[error("{provider} provider error [{kind}]: {message}")]
pub struct ProviderError {
    /// Taxonomy bucket.
    pub kind: ErrorKind,

    /// Name of the provider that produced the failure.
    pub provider: String,

    /// HTTP status code, when one was observed.
    pub status_code: Option<u16>,

    /// Human-readable description.
    pub message: String,

    /// Whether the retry executor may re-attempt the call.
    pub retryable: bool,

    /// Provider-suggested wait before retrying, in seconds.
    pub retry_after: Option<u64>,

    /// The wrapped underlying error, when available.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Create an error with the kind's default retryability.
    pub fn new(kind: ErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            status_code: None,
            message: message.into(),
            retryable: kind.default_retryable(),
            retry_after: None,
            source: None,
        }
    }

    /// Attach an HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Attach the underlying error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override the default retryability for this kind.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach a provider-suggested retry delay in seconds.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    // ------------------------------------------------------------------
    // Constructors for the common shapes
    // ------------------------------------------------------------------

    /// 401: authentication failed.
    pub fn authentication(provider: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Authentication,
            provider,
            "authentication failed - check API key",
        )
        .with_status(401)
    }

    /// 403: key valid but lacks access to the model or endpoint.
    pub fn forbidden(provider: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Authentication,
            provider,
            "forbidden - check API key permissions or model access",
        )
        .with_status(403)
    }

    /// 404: model or resource not found.
    pub fn not_found(provider: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, provider, "model or resource not found").with_status(404)
    }

    /// 429: provider-side rate limit.
    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<u64>) -> Self {
        let mut err =
            Self::new(ErrorKind::RateLimit, provider, "rate limit exceeded").with_status(429);
        err.retry_after = retry_after;
        err
    }

    /// 5xx response.
    pub fn server(provider: impl Into<String>, status: u16) -> Self {
        Self::new(
            ErrorKind::ServerError,
            provider,
            format!("server error (status {status})"),
        )
        .with_status(status)
    }

    /// 4xx request rejection with detail.
    pub fn validation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, provider, message).with_status(400)
    }

    /// Transport-level failure.
    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, provider, message)
    }

    /// The upstream call exceeded its deadline.
    pub fn timeout(provider: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, provider, "request timeout")
    }

    /// The caller canceled the request.
    pub fn canceled(provider: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, provider, "request canceled")
    }

    /// Provider declared itself overloaded or temporarily unavailable.
    pub fn unavailable(provider: impl Into<String>, status: u16) -> Self {
        Self::new(
            ErrorKind::Unavailable,
            provider,
            "service overloaded - temporarily unavailable",
        )
        .with_status(status)
    }

    /// Unclassified failure; retried only when `status >= 500`.
    pub fn unknown(provider: impl Into<String>, status: Option<u16>) -> Self {
        let retryable = status.map(|s| s >= 500).unwrap_or(false);
        let mut err = Self::new(ErrorKind::Unknown, provider, "unknown error");
        err.status_code = status;
        err.retryable = retryable;
        err
    }
}

// ============================================================================
// Gateway Errors
// ============================================================================

/// Routing-level failures: selection, retry exhaustion, chain exhaustion.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider manager holds no providers at all.
    #[error("no providers available")]
    NoProviders,

    /// Every provider's circuit breaker rejected execution.
    #[error("no healthy providers available")]
    NoHealthyProviders,

    /// A pre-selection filter drained the candidate set.
    #[error("filter {0} filtered out all providers")]
    FilteredEmpty(String),

    /// The strategy router could not pick any candidate.
    #[error("no available providers")]
    NoAvailable,

    /// A tier constraint matched no models on any candidate.
    #[error("no available providers in tier: {0}")]
    NoProvidersInTier(String),

    /// The first error in a retry sequence was not retryable.
    #[error("non-retryable error: {0}")]
    NonRetryable(#[source] ProviderError),

    /// All retry attempts were consumed.
    #[error("max retry attempts ({attempts}) exceeded: {last}")]
    MaxAttemptsExceeded {
        attempts: u32,
        #[source]
        last: ProviderError,
    },

    /// The request was canceled by the caller.
    #[error("request canceled")]
    Canceled,

    /// Every provider in the fallback chain failed.
    #[error("all providers in fallback chain failed ({tried} tried): {last}")]
    AllProvidersFailed {
        tried: usize,
        #[source]
        last: Box<GatewayError>,
    },

    /// Invalid configuration detected at startup or reload.
    #[error("configuration error: {0}")]
    Config(String),

    /// A provider failure that reached the caller without retry wrapping.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GatewayError {
    /// The underlying provider error, when this wraps one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            GatewayError::NonRetryable(e)
            | GatewayError::MaxAttemptsExceeded { last: e, .. }
            | GatewayError::Provider(e) => Some(e),
            GatewayError::AllProvidersFailed { last, .. } => last.provider_error(),
            _ => None,
        }
    }

    /// True when this outcome represents caller cancellation.
    ///
    /// Cancellations are never counted as provider failures by the circuit
    /// breaker.
    pub fn is_cancellation(&self) -> bool {
        match self {
            GatewayError::Canceled => true,
            other => other
                .provider_error()
                .map(|e| e.kind == ErrorKind::Canceled)
                .unwrap_or(false),
        }
    }
}
