//! Admin surface: usage history, breaker status, budget reset, reload.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::error;

use crate::app::TenantResolver;
use crate::server::ServerState;

/// `GET /admin/usage?date=YYYY-MM-DD`
pub async fn usage(
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let app = state.resolver.resolve();
    let date = params
        .get("date")
        .cloned()
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());

    match app.history.daily(&date).await {
        Ok(stats) => Json(json!({ "date": date, "usage": stats })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Failed to fetch usage history",
                "details": err.to_string(),
            })),
        )
            .into_response(),
    }
}

/// `GET /admin/status`
pub async fn status(State(state): State<ServerState>) -> Response {
    let app = state.resolver.resolve();

    let circuits: HashMap<String, &'static str> = app
        .circuits
        .states()
        .into_iter()
        .map(|(name, state)| (name, state.as_str()))
        .collect();

    Json(json!({
        "strategy": app.router.strategy_name(),
        "providers": app.manager.names(),
        "circuit_breakers": circuits,
    }))
    .into_response()
}

/// `POST /admin/budgets/reset?provider=<name>`
pub async fn reset_budget(
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(provider) = params.get("provider").filter(|p| !p.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "provider query parameter is required" })),
        )
            .into_response();
    };

    let app = state.resolver.resolve();
    app.budget.reset(provider).await;
    Json(json!({ "status": "ok", "provider": provider })).into_response()
}

/// `POST /admin/config/reload`
pub async fn reload(State(state): State<ServerState>) -> Response {
    match state.resolver.reload().await {
        Ok(()) => Json(json!({ "status": "reloaded" })).into_response(),
        Err(err) => {
            error!(error = %err, "configuration reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
