//! Handlers for the Ollama-compatible endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, info};

use tether_local_ai::DownloadProgress;

use crate::dto::{
    token_budget, ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, HealthResponse,
    LoadRequest, LoadResponse, ModelTag, TagsResponse,
};
use crate::error::ApiError;
use crate::AppState;

type Shared = State<Arc<AppState>>;

pub async fn health(State(state): Shared) -> Json<HealthResponse> {
    let controller = &state.controller;
    Json(HealthResponse {
        status: "ok",
        backend_available: controller.backend_available(),
        model_loaded: controller.is_loaded(),
        model_id: controller.resident_id(),
        loading: controller.is_loading(),
    })
}

pub async fn tags(State(state): Shared) -> Json<TagsResponse> {
    let models = match state.controller.ready_id() {
        Some(id) => vec![ModelTag::resident(&id, timestamp())],
        None => Vec::new(),
    };
    Json(TagsResponse { models })
}

pub async fn download_status(State(state): Shared) -> Json<DownloadProgress> {
    Json(state.controller.tracker().snapshot())
}

pub async fn load(
    State(state): Shared,
    Json(req): Json<LoadRequest>,
) -> Result<Json<LoadResponse>, ApiError> {
    require_backend(&state)?;

    let outcome = state.controller.load(&req.model).await?;
    info!("POST /api/load '{}': {}", req.model, outcome.as_str());
    Ok(Json(LoadResponse {
        status: outcome.as_str(),
        model: req.model,
    }))
}

pub async fn generate(
    State(state): Shared,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    require_backend(&state)?;
    state.controller.ensure_loaded(&req.model).await?;

    let max_new_tokens = token_budget(
        req.max_new_tokens,
        req.options.as_ref(),
        state.default_max_new_tokens,
    );
    let result = state.executor.run(&req.prompt, max_new_tokens).await?;
    debug!(
        "generate '{}': {} prompt tokens, {} generated",
        req.model, result.prompt_token_count, result.generated_token_count
    );

    let body = GenerateResponse::finished(&req.model, timestamp(), result);
    if req.stream {
        ndjson(&[body.placeholder(), body])
    } else {
        Ok(Json(body).into_response())
    }
}

pub async fn chat(
    State(state): Shared,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    require_backend(&state)?;
    state.controller.ensure_loaded(&req.model).await?;

    let max_new_tokens = token_budget(
        req.max_new_tokens,
        req.options.as_ref(),
        state.default_max_new_tokens,
    );
    let result = state.executor.chat(&req.messages, max_new_tokens).await?;
    debug!(
        "chat '{}': {} messages, {} generated tokens",
        req.model,
        req.messages.len(),
        result.generated_token_count
    );

    let body = ChatResponse::finished(&req.model, timestamp(), result);
    if req.stream {
        ndjson(&[body.placeholder(), body])
    } else {
        Ok(Json(body).into_response())
    }
}

fn require_backend(state: &AppState) -> Result<(), ApiError> {
    if state.controller.backend_available() {
        Ok(())
    } else {
        Err(ApiError::backend_unavailable())
    }
}

/// Newline-delimited JSON, one object per line.
fn ndjson<T: Serialize>(chunks: &[T]) -> Result<Response, ApiError> {
    let mut lines = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut line = serde_json::to_string(chunk)?;
        line.push('\n');
        lines.push(Ok::<_, Infallible>(line));
    }

    let body = Body::from_stream(futures_util::stream::iter(lines));
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
