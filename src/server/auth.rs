//! Bearer-token authentication middleware.
//!
//! Active only when the config lists at least one token; otherwise every
//! request passes. Failures return 401 with a JSON error body.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Accepted bearer tokens; empty disables auth.
#[derive(Clone)]
pub struct AuthTokens(pub Arc<Vec<String>>);

pub async fn require_bearer(
    State(AuthTokens(tokens)): State<AuthTokens>,
    request: Request,
    next: Next,
) -> Response {
    if tokens.is_empty() {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(header) = header else {
        return unauthorized("Authorization header is required");
    };

    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();

    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return unauthorized("Invalid authorization header format. Expected 'Bearer <token>'");
    }

    if !tokens.iter().any(|t| t == token) {
        return unauthorized("Invalid API key");
    }

    next.run(request).await
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}
