//! HTTP surface: routes, auth, validation and the metrics listener.
//!
//! The gateway listener serves `/health`, the completion endpoint and the
//! admin surface; bearer auth (when configured) guards everything except
//! `/health`. A second listener exposes Prometheus metrics on its own port.

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use tracing::info;

use crate::app::{SingleTenantResolver, TenantResolver};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    pub resolver: Arc<SingleTenantResolver>,
}

/// Build the gateway router.
pub fn build_router(resolver: Arc<SingleTenantResolver>) -> Router {
    let tokens = auth::AuthTokens(Arc::new(
        resolver.resolve().config.server.auth_tokens.clone(),
    ));
    let state = ServerState { resolver };

    let protected = Router::new()
        .route("/v1/chat/completions", post(handlers::completions))
        .route("/admin/usage", get(admin::usage))
        .route("/admin/status", get(admin::status))
        .route("/admin/budgets/reset", post(admin::reset_budget))
        .route("/admin/config/reload", post(admin::reload))
        .layer(axum::middleware::from_fn_with_state(
            tokens,
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state)
}

/// Bind and serve the gateway until the process exits.
pub async fn serve(resolver: Arc<SingleTenantResolver>, addr: &str) -> Result<(), GatewayError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Config(format!("failed to bind {addr}: {e}")))?;
    info!(addr, "gateway listening");

    axum::serve(listener, build_router(resolver))
        .await
        .map_err(|e| GatewayError::Config(format!("server error: {e}")))
}

/// Build the metrics router.
pub fn metrics_router(metrics: Arc<GatewayMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<GatewayMetrics>>) -> String {
    metrics.render()
}

/// Serve the metrics listener on its own port.
pub async fn serve_metrics(metrics: Arc<GatewayMetrics>, port: u16) -> Result<(), GatewayError> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Config(format!("failed to bind metrics port {port}: {e}")))?;
    info!(port, "metrics listening");

    axum::serve(listener, metrics_router(metrics))
        .await
        .map_err(|e| GatewayError::Config(format!("metrics server error: {e}")))
}
