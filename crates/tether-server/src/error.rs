//! Mapping of lifecycle errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use tether_local_ai::{InferenceError, LoadError};

/// An error returned to an API client as `{"detail": "..."}`.
#[derive(Debug, Error)]
#[error("{status}: {detail}")]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// The inference backend is not installed.
    pub fn backend_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Inference backend is not installed. Install llama-server or set TETHER_LLAMA_SERVER.",
        )
    }
}

impl From<LoadError> for ApiError {
    fn from(err: LoadError) -> Self {
        let status = match err {
            LoadError::BackendUnavailable => return Self::backend_unavailable(),
            LoadError::AlreadyLoading => StatusCode::CONFLICT,
            LoadError::IncompleteCache { .. } | LoadError::Fetch(_) | LoadError::Failed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        let status = match err {
            InferenceError::NotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::Backend(_) | InferenceError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
