//! Gateway server binary.
//!
//! Startup order: logging (profile from `APP_ENV`), config load, bundle
//! assembly, metrics listener (`METRICS_PORT`, default 9090), gateway
//! listener. Any startup failure exits with code 1.

use std::sync::Arc;

use anyhow::Context;
use tracing::error;
use tracing_subscriber::EnvFilter;

use modelrelay::app::{App, SingleTenantResolver};
use modelrelay::config::GatewayConfig;
use modelrelay::metrics::GatewayMetrics;

fn init_logging() {
    let default_level = match std::env::var("APP_ENV").as_deref() {
        Ok("production") => "info",
        Ok("test") => "warn",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("modelrelay={default_level},info")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run() -> anyhow::Result<()> {
    init_logging();

    let config = GatewayConfig::load().context("failed to load configuration")?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let metrics = Arc::new(GatewayMetrics::new());
    let app = App::build(config, metrics.clone())
        .await
        .context("failed to assemble application bundle")?;
    let resolver = Arc::new(SingleTenantResolver::new(app));

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090);

    let metrics_handle = tokio::spawn(modelrelay::server::serve_metrics(
        metrics.clone(),
        metrics_port,
    ));

    let gateway = modelrelay::server::serve(resolver.clone(), &addr);
    tokio::select! {
        result = gateway => result.context("gateway server failed")?,
        result = metrics_handle => result
            .context("metrics task panicked")?
            .context("metrics server failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = ?err, "startup failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
