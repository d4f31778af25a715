//! Ollama-compatible HTTP API in front of the model lifecycle.

mod dto;
pub mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tracing::info;

use tether_local_ai::{InferenceExecutor, ModelController, TetherConfig};

pub use error::ApiError;

/// Errors from running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// State shared by every request handler.
pub struct AppState {
    pub controller: ModelController,
    pub executor: InferenceExecutor,
    pub default_max_new_tokens: u32,
}

impl AppState {
    pub fn new(controller: ModelController, config: &TetherConfig) -> Self {
        let executor = InferenceExecutor::new(controller.clone(), config.max_input_tokens);
        Self {
            controller,
            executor,
            default_max_new_tokens: config.default_max_new_tokens,
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/tags", get(routes::tags))
        .route("/api/download-status", get(routes::download_status))
        .route("/api/load", post(routes::load))
        .route("/api/generate", post(routes::generate))
        .route("/api/chat", post(routes::chat))
        .with_state(Arc::new(state))
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)
}
