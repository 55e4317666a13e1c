//! Translation from wire-level failures into the error taxonomy.
//!
//! This is the single place where HTTP statuses and transport errors become
//! [`ProviderError`]s. Everything downstream (retry, breakers, fallback)
//! reads only `kind` and `retryable`, which keeps the routing pipeline
//! backend-agnostic.

use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::ProviderError;

/// Longest body snippet carried into an error message.
const BODY_SNIPPET_LEN: usize = 200;

/// Map a non-success HTTP status to the taxonomy.
pub fn status_error(
    provider: &str,
    status: u16,
    body: &str,
    headers: &HeaderMap,
) -> ProviderError {
    match status {
        401 => ProviderError::authentication(provider),
        403 => ProviderError::forbidden(provider),
        404 => ProviderError::not_found(provider),
        429 => ProviderError::rate_limited(provider, retry_after_secs(headers)),
        400 => ProviderError::validation(
            provider,
            format!("invalid request parameters: {}", snippet(body)),
        ),
        402 => ProviderError::new(
            crate::error::ErrorKind::QuotaExceeded,
            provider,
            "account quota exhausted",
        )
        .with_status(402),
        413 => ProviderError::validation(
            provider,
            "request too large - reduce message size or tokens",
        )
        .with_status(413),
        422 => ProviderError::validation(provider, "unprocessable entity - validation failed")
            .with_status(422),
        // Anthropic-specific overload signal.
        529 => ProviderError::unavailable(provider, 529),
        500 | 502 | 503 | 504 => ProviderError::server(provider, status),
        other => ProviderError::unknown(provider, Some(other)),
    }
}

/// Map a reqwest transport failure to the taxonomy.
pub fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(provider).with_source(err)
    } else if err.is_connect() {
        ProviderError::network(provider, format!("connection failed: {err}")).with_source(err)
    } else {
        ProviderError::network(provider, err.to_string()).with_source(err)
    }
}

/// Parse the `Retry-After` header as delay seconds.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .take_while(|(i, _)| *i < BODY_SNIPPET_LEN)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn headers_with_retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_auth_statuses() {
        let err = status_error("openai", 401, "", &HeaderMap::new());
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert!(!err.is_retryable());

        let err = status_error("openai", 403, "", &HeaderMap::new());
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(err.status_code, Some(403));
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        let err = status_error("openai", 429, "", &headers_with_retry_after("30"));
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.retry_after, Some(30));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rate_limit_without_header() {
        let err = status_error("openai", 429, "", &HeaderMap::new());
        assert_eq!(err.retry_after, None);
    }

    #[test]
    fn test_server_errors_retryable() {
        for status in [500u16, 502, 503, 504] {
            let err = status_error("gemini", status, "", &HeaderMap::new());
            assert_eq!(err.kind, ErrorKind::ServerError, "status {status}");
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_overloaded_529() {
        let err = status_error("anthropic", 529, "", &HeaderMap::new());
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_carries_body_snippet() {
        let err = status_error("openai", 400, r#"{"error":"bad role"}"#, &HeaderMap::new());
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("bad role"));
    }

    #[test]
    fn test_body_snippet_truncated() {
        let long = "x".repeat(5000);
        let err = status_error("openai", 400, &long, &HeaderMap::new());
        assert!(err.message.len() < 300);
    }

    #[test]
    fn test_quota_402() {
        let err = status_error("openai", 402, "", &HeaderMap::new());
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unclassified_status() {
        let err = status_error("openai", 418, "", &HeaderMap::new());
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(!err.is_retryable());

        let err = status_error("openai", 599, "", &HeaderMap::new());
        assert!(err.is_retryable());
    }
}
