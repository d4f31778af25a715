//! Error types for model lifecycle operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by an [`ArtifactStore`](crate::ArtifactStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The hub answered with a non-success status.
    #[error("hub error: {0}")]
    Api(String),

    /// Repository does not exist or is not accessible.
    #[error("repository '{0}' not found")]
    RepoNotFound(String),

    /// Checksum verification failed for a downloaded file.
    #[error("checksum mismatch for {file}. Expected: {expected}, got: {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by an [`InferenceBackend`](crate::InferenceBackend) or a
/// [`LoadedModel`](crate::LoadedModel).
#[derive(Debug, Error)]
pub enum BackendError {
    /// A file the backend needed was absent. This is the signal of a
    /// partially written local cache.
    #[error("missing model file: {}", .path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<unknown>".to_string()))]
    MissingFile { path: Option<PathBuf> },

    /// The backend is not installed.
    #[error("inference backend not installed at {0}")]
    NotInstalled(String),

    /// Backend process failed to start.
    #[error("failed to start backend: {0}")]
    StartFailed(String),

    /// Timeout waiting for the backend to become ready.
    #[error("timeout waiting for backend to become ready")]
    StartTimeout,

    /// Backend answered a request with an error.
    #[error("backend error: {0}")]
    Api(String),

    /// HTTP request to the backend failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from fetching a model into the local cache.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The local model directory could not be prepared.
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote download failed.
    #[error("download of '{model_id}' failed: {source}")]
    Download {
        model_id: String,
        #[source]
        source: StoreError,
    },
}

/// Errors from [`ModelController::load`](crate::ModelController::load).
#[derive(Debug, Error)]
pub enum LoadError {
    /// No inference backend is installed.
    #[error("inference backend is not installed")]
    BackendUnavailable,

    /// Another load is in progress.
    #[error("A model is already loading. Try again shortly.")]
    AlreadyLoading,

    /// Repair attempts were exhausted and the cache is still incomplete.
    #[error("Model cache appears incomplete for '{model_id}'. Please retry model load.")]
    IncompleteCache { model_id: String },

    /// Fetching model files failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Any other load failure.
    #[error("Failed to load model '{model_id}': {message}")]
    Failed { model_id: String, message: String },
}

/// Errors from [`InferenceExecutor`](crate::InferenceExecutor).
#[derive(Debug, Error)]
pub enum InferenceError {
    /// No model is resident and ready.
    #[error("No model loaded. Call POST /api/load first.")]
    NotLoaded,

    /// The backend failed while generating.
    #[error("Inference error: {0}")]
    Backend(#[from] BackendError),

    /// The blocking worker running the generation did not complete.
    #[error("Inference error: worker failed: {0}")]
    Worker(String),
}
