//! The model lifecycle state machine.
//!
//! ```text
//! Empty ──load(A)──> Loading ──ok──> Ready(A) ──load(B)──> Loading ──ok──> Ready(B)
//!                       │                │
//!                       └──err──> Empty  └──load(A)──> Ready(A)  (no-op)
//! ```
//!
//! At most one load runs at a time; a second caller gets
//! [`LoadError::AlreadyLoading`] instead of queueing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::backend::{InferenceBackend, LoadedModel};
use crate::config::TetherConfig;
use crate::error::{BackendError, LoadError};
use crate::fetcher::AssetFetcher;
use crate::progress::DownloadTracker;
use crate::repair::{RepairAction, SnapshotRepairPolicy};

/// A loaded model and the id it was loaded under.
pub struct ModelHandle {
    id: String,
    model: Box<dyn LoadedModel>,
}

impl ModelHandle {
    /// Id the model was requested with.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The backend model.
    pub fn model(&self) -> &dyn LoadedModel {
        self.model.as_ref()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").field("id", &self.id).finish()
    }
}

/// Result of a successful [`ModelController::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The requested model was already resident.
    AlreadyLoaded,
    /// The model was fetched and loaded by this call.
    Loaded,
}

impl LoadOutcome {
    /// Wire name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadOutcome::AlreadyLoaded => "already_loaded",
            LoadOutcome::Loaded => "loaded",
        }
    }
}

/// `loading == true` implies `resident` is `None`; a handle is only installed
/// once its load has completed.
#[derive(Default)]
struct ControllerState {
    resident: Option<Arc<ModelHandle>>,
    loading: bool,
}

struct Inner {
    backend: Arc<dyn InferenceBackend>,
    fetcher: AssetFetcher,
    tracker: DownloadTracker,
    repair: SnapshotRepairPolicy,
    state: Mutex<ControllerState>,
}

/// Owns the resident model and serializes loads.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ModelController {
    inner: Arc<Inner>,
}

impl ModelController {
    /// Create a controller with no resident model.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        fetcher: AssetFetcher,
        repair: SnapshotRepairPolicy,
    ) -> Self {
        let tracker = fetcher.tracker().clone();
        Self {
            inner: Arc::new(Inner {
                backend,
                fetcher,
                tracker,
                repair,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    /// Build the fetcher and repair policy from `config`.
    pub fn from_config(
        config: &TetherConfig,
        store: Arc<dyn crate::ArtifactStore>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        let fetcher = AssetFetcher::new(store, DownloadTracker::new(), &config.models_dir)
            .with_sample_interval(config.sample_interval)
            .with_stop_timeout(config.sampler_stop_timeout);
        Self::new(
            backend,
            fetcher,
            SnapshotRepairPolicy::new(config.max_repairs),
        )
    }

    /// Progress of the current or most recent fetch.
    pub fn tracker(&self) -> &DownloadTracker {
        &self.inner.tracker
    }

    /// Whether the inference backend is installed.
    pub fn backend_available(&self) -> bool {
        self.inner.backend.is_available()
    }

    /// True iff a model is resident and no load is running.
    pub fn is_loaded(&self) -> bool {
        let state = self.inner.lock_state();
        state.resident.is_some() && !state.loading
    }

    /// Whether a load is running.
    pub fn is_loading(&self) -> bool {
        self.inner.lock_state().loading
    }

    /// Id of the resident model, if any.
    pub fn resident_id(&self) -> Option<String> {
        let state = self.inner.lock_state();
        state.resident.as_ref().map(|h| h.id.clone())
    }

    /// Id of the resident model if it is ready to serve.
    ///
    /// Unlike [`ModelController::resident`] this never holds a reference to
    /// the model itself.
    pub fn ready_id(&self) -> Option<String> {
        let state = self.inner.lock_state();
        if state.loading {
            return None;
        }
        state.resident.as_ref().map(|h| h.id.clone())
    }

    /// The resident model if it is ready to serve.
    pub fn resident(&self) -> Option<Arc<ModelHandle>> {
        let state = self.inner.lock_state();
        if state.loading {
            return None;
        }
        state.resident.clone()
    }

    /// Load `model_id`, replacing any resident model.
    ///
    /// The load runs in its own task: if the caller stops waiting, the load
    /// still runs to completion and clears the loading flag.
    pub async fn load(&self, model_id: &str) -> Result<LoadOutcome, LoadError> {
        if !self.inner.backend.is_available() {
            return Err(LoadError::BackendUnavailable);
        }

        let previous = {
            let mut state = self.inner.lock_state();
            if state.loading {
                return Err(LoadError::AlreadyLoading);
            }
            if state.resident.as_ref().is_some_and(|h| h.id == model_id) {
                return Ok(LoadOutcome::AlreadyLoaded);
            }
            state.loading = true;
            state.resident.take()
        };

        let inner = Arc::clone(&self.inner);
        let id = model_id.to_string();
        let task = tokio::spawn(async move {
            let guard = LoadingGuard::new(Arc::clone(&inner));

            if let Some(previous) = previous {
                release_handle(previous).await;
            }

            info!("Loading model '{}'", id);
            match inner.run_pipeline(&id).await {
                Ok(model) => {
                    guard.finish(Some(ModelHandle { id: id.clone(), model }));
                    info!("Model '{}' is ready", id);
                    Ok(LoadOutcome::Loaded)
                }
                Err(e) => {
                    warn!("Loading '{}' failed: {}", id, e);
                    inner.tracker.mark_failed(&e.to_string());
                    guard.finish(None);
                    Err(e)
                }
            }
        });

        task.await.map_err(|e| LoadError::Failed {
            model_id: model_id.to_string(),
            message: format!("load task failed: {e}"),
        })?
    }

    /// Load `model_id` unless it is already resident and ready.
    ///
    /// May trigger a full download, so callers should expect high latency the
    /// first time an id is used.
    pub async fn ensure_loaded(&self, model_id: &str) -> Result<LoadOutcome, LoadError> {
        if self.is_loaded() && self.resident_id().as_deref() == Some(model_id) {
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        self.load(model_id).await
    }

    /// Release the resident model. Idempotent.
    pub async fn release(&self) {
        let resident = self.inner.lock_state().resident.take();
        if let Some(handle) = resident {
            release_handle(handle).await;
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch and load `model_id`, repairing the local cache when the backend
    /// reports missing files.
    async fn run_pipeline(&self, model_id: &str) -> Result<Box<dyn LoadedModel>, LoadError> {
        let mut repairs_made = 0;

        loop {
            let dir = self.fetcher.fetch(model_id).await?;
            self.tracker.mark_loading_model(model_id);

            let backend = Arc::clone(&self.backend);
            let load_dir = dir.clone();
            let loaded = tokio::task::spawn_blocking(move || backend.load(&load_dir))
                .await
                .map_err(|e| LoadError::Failed {
                    model_id: model_id.to_string(),
                    message: format!("load worker failed: {e}"),
                })?;

            let missing = match loaded {
                Ok(model) => {
                    self.tracker.mark_ready();
                    return Ok(model);
                }
                Err(BackendError::MissingFile { path }) => path,
                Err(e) => {
                    return Err(LoadError::Failed {
                        model_id: model_id.to_string(),
                        message: e.to_string(),
                    })
                }
            };

            let action = self.repair.decide(missing.as_deref(), repairs_made);
            if action == RepairAction::GiveUp {
                return Err(LoadError::IncompleteCache {
                    model_id: model_id.to_string(),
                });
            }

            warn!(
                "Model '{}' is missing {:?}; repairing local cache ({:?})",
                model_id, missing, action
            );
            let repair = self.repair;
            let model_dir = self.fetcher.model_dir(model_id);
            if let Err(e) =
                tokio::task::spawn_blocking(move || repair.apply(&action, &model_dir)).await
            {
                warn!("Cache repair worker failed: {}", e);
            }
            repairs_made += 1;
        }
    }
}

/// Owns the loading flag for one load.
///
/// [`LoadingGuard::finish`] ends the load under the state lock. A guard
/// dropped without finishing (the load task panicked) clears the flag and
/// marks the progress record failed.
struct LoadingGuard {
    inner: Arc<Inner>,
    armed: bool,
}

impl LoadingGuard {
    fn new(inner: Arc<Inner>) -> Self {
        Self { inner, armed: true }
    }

    /// Install `handle` (or nothing) and clear the loading flag in one step.
    ///
    /// After this returns another load may start, so nothing belonging to
    /// this load may touch the state or the tracker afterwards.
    fn finish(mut self, handle: Option<ModelHandle>) {
        let mut state = self.inner.lock_state();
        state.resident = handle.map(Arc::new);
        state.loading = false;
        self.armed = false;
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.inner.tracker.mark_failed("Load interrupted");
        self.inner.lock_state().loading = false;
    }
}

async fn release_handle(handle: Arc<ModelHandle>) {
    info!("Releasing model '{}'", handle.id);
    if let Err(e) = tokio::task::spawn_blocking(move || handle.model.release()).await {
        warn!("Releasing model failed: {}", e);
    }
}
