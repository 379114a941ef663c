//! HTTP server setup.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::Config;
use crate::consult::ConsultRouter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ConsultRouter>,
}

impl AppState {
    pub fn new(router: Arc<ConsultRouter>) -> Self {
        Self { router }
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/consult", post(handlers::consult))
        .route("/health", get(handlers::health))
        // Operations
        .route("/v1/status", get(handlers::status))
        .route("/v1/circuits/:provider/reset", post(handlers::reset_circuit))
        .route("/v1/cache/sweep", post(handlers::sweep_cache))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until Ctrl-C, then stop background work.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let router = Arc::new(ConsultRouter::from_config(&config).await?);
    if router.provider_ids().is_empty() {
        tracing::warn!("No providers configured, every consultation will fail");
    }
    router.start_background(config.cache.sweep_interval());

    let app = create_router(AppState::new(router.clone()));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting consultr server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    router.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
