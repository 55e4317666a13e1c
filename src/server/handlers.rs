//! Health and completion handlers.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::TenantResolver;
use crate::chain::build_chain;
use crate::error::GatewayError;
use crate::server::validation::{validate, CompletionRequest};
use crate::server::ServerState;
use crate::traits::CompletionInput;

/// `GET /health`
pub async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let app = state.resolver.resolve();
    Json(json!({
        "status": "healthy",
        "providers": app.manager.count(),
    }))
}

/// `POST /v1/chat/completions`
pub async fn completions(
    State(state): State<ServerState>,
    Json(raw): Json<CompletionRequest>,
) -> Response {
    let app = state.resolver.resolve();

    let valid = match validate(raw) {
        Ok(valid) => valid,
        Err(message) => {
            app.metrics.record_http(400);
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    info!(
        message_count = valid.messages.len(),
        stream = valid.stream,
        tier = valid.tier.map(|t| t.as_str()).unwrap_or(""),
        "completion request received"
    );

    let selection = match app
        .router
        .select(&valid.messages, valid.tier, &app.circuits)
        .await
    {
        Ok(selection) => selection,
        Err(err) => {
            warn!(error = %err, "provider selection failed");
            app.metrics.record_http(503);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "no available providers, cannot process requests",
                    "detail": err.to_string(),
                })),
            )
                .into_response();
        }
    };

    let chain = build_chain(&selection, &app.fallbacks, &app.manager, &app.catalog);
    info!(
        chain_length = chain.len(),
        primary_provider = selection.provider.name(),
        "provider chain built"
    );

    let input = CompletionInput {
        model: selection.model.clone().or(valid.model),
        messages: valid.messages,
        options: valid.options,
    };

    // Dropping the response future (client disconnect) cancels everything
    // downstream through this token.
    let cancel = CancellationToken::new();

    if valid.stream {
        let guard = cancel.clone().drop_guard();
        let chunks = app.executor.execute_stream(cancel, chain, input);

        let events = chunks.map(move |chunk| {
            let _hold = &guard;
            let event = match &chunk.error {
                Some(err) => Event::default()
                    .event("error")
                    .json_data(json!({ "error": err.to_string() }))
                    .unwrap_or_else(|_| Event::default().event("error").data("{}")),
                None => Event::default()
                    .event("message")
                    .json_data(&chunk)
                    .unwrap_or_else(|_| Event::default().event("message").data("{}")),
            };
            Ok::<Event, Infallible>(event)
        });

        app.metrics.record_http(200);
        return Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response();
    }

    match app.executor.execute(&cancel, &chain, &input).await {
        Ok(outcome) => {
            app.metrics.record_http(200);
            let mut body = json!({
                "message": outcome.response.message.content,
                "role": "assistant",
                "provider": outcome.provider,
            });
            if let Some(model) = &outcome.model {
                body["model"] = json!(model);
            }
            (
                [("x-request-cost", format!("{:.6}", outcome.response.cost_usd))],
                Json(body),
            )
                .into_response()
        }
        Err(GatewayError::AllProvidersFailed { tried, last }) => {
            app.metrics.record_http(500);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "All providers in fallback chain failed",
                    "last_error": last.to_string(),
                    "tried_count": tried,
                })),
            )
                .into_response()
        }
        Err(err) => {
            app.metrics.record_http(500);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
