pub mod config;
pub mod error;
pub mod rate_limit;
pub mod store;

use crate::config::AppConfig;
use crate::error::{QuotaError, Result};
use crate::rate_limit::{rate_limit_middleware, RateLimiterService, SystemClock};
use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

async fn health() -> &'static str {
    "ok"
}

async fn protected() -> Json<Value> {
    Json(json!({ "message": "request allowed" }))
}

/// Build the HTTP application with rate limiting applied
pub fn app(service: Arc<RateLimiterService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/protected", get(protected))
        .layer(middleware::from_fn_with_state(service, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Initialize the rate limited server and run until Ctrl-C
pub async fn init_server(config: AppConfig) -> Result<()> {
    config.validate()?;

    info!("Starting quotaguard");

    let service = Arc::new(
        RateLimiterService::from_config(&config.rate_limit, Arc::new(SystemClock)).await?,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| QuotaError::Internal(format!("Server error: {}", e)))?;

    service.shutdown().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotaguard=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
