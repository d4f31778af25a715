//! Download progress tracking.
//!
//! A [`DownloadTracker`] holds the process-wide [`DownloadProgress`] record.
//! Writers replace the whole snapshot, so readers never see a torn record.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

/// Phase of the current fetch-and-load pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadPhase {
    Idle,
    Downloading,
    LoadingModel,
    Downloaded,
    Done,
    Error,
}

/// Snapshot of download progress, serialized verbatim by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub active: bool,
    pub phase: DownloadPhase,
    pub model: Option<String>,
    pub status: String,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<f64>,
    pub eta_seconds: Option<u64>,
    /// Unix timestamp in seconds.
    pub started_at: Option<f64>,
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self {
            active: false,
            phase: DownloadPhase::Idle,
            model: None,
            status: "idle".to_string(),
            downloaded_bytes: 0,
            total_bytes: None,
            percent: None,
            eta_seconds: None,
            started_at: None,
        }
    }
}

/// Counters observed by one sampler tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleMetrics {
    pub downloaded_bytes: u64,
    pub percent: Option<f64>,
    pub eta_seconds: Option<u64>,
}

impl SampleMetrics {
    /// Derive percent and ETA from bytes downloaded so far.
    pub fn compute(downloaded: u64, total: Option<u64>, elapsed_secs: f64) -> Self {
        let elapsed = elapsed_secs.max(1e-6);
        let rate = downloaded as f64 / elapsed;

        let (percent, eta_seconds) = match total {
            Some(total) if total > 0 => {
                let remaining = total.saturating_sub(downloaded);
                let eta = (rate > 0.0).then(|| (remaining as f64 / rate) as u64);
                (Some(percent_of(downloaded, total)), eta)
            }
            _ => (None, None),
        };

        Self {
            downloaded_bytes: downloaded,
            percent,
            eta_seconds,
        }
    }
}

/// `downloaded / total` as a percentage rounded to one decimal, capped at 100.
pub fn percent_of(downloaded: u64, total: u64) -> f64 {
    let raw = downloaded as f64 / total as f64 * 100.0;
    ((raw * 10.0).round() / 10.0).min(100.0)
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Incremented by every [`DownloadTracker::begin`].
    epoch: u64,
    snapshot: Arc<DownloadProgress>,
}

/// Shared handle to the current [`DownloadProgress`].
#[derive(Debug, Clone, Default)]
pub struct DownloadTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl DownloadTracker {
    /// Create a tracker in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> DownloadProgress {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (*state.snapshot).clone()
    }

    fn replace<F>(&self, f: F)
    where
        F: FnOnce(&DownloadProgress) -> DownloadProgress,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.snapshot = Arc::new(f(&state.snapshot));
    }

    /// Start a new fetch, discarding the previous record. Returns the epoch
    /// that identifies this fetch to [`DownloadTracker::record_sample`].
    pub fn begin(&self, model_id: &str, total_bytes: Option<u64>, started_at: f64) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.epoch += 1;
        state.snapshot = Arc::new(DownloadProgress {
            active: true,
            phase: DownloadPhase::Downloading,
            model: Some(model_id.to_string()),
            status: "Downloading model files".to_string(),
            downloaded_bytes: 0,
            total_bytes,
            percent: None,
            eta_seconds: None,
            started_at: Some(started_at),
        });
        state.epoch
    }

    /// Store a sampler observation for the fetch identified by `epoch`.
    ///
    /// Dropped if a newer fetch started or this one was already finalized.
    /// Percent never decreases within a fetch.
    pub fn record_sample(&self, epoch: u64, metrics: SampleMetrics) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let current = &state.snapshot;
        if state.epoch != epoch || !current.active || current.phase != DownloadPhase::Downloading
        {
            return false;
        }

        let percent = match (current.percent, metrics.percent) {
            (Some(prev), Some(next)) => Some(prev.max(next)),
            (_, next) => next,
        };

        let next = DownloadProgress {
            downloaded_bytes: metrics.downloaded_bytes,
            percent,
            eta_seconds: metrics.eta_seconds,
            ..(**current).clone()
        };
        state.snapshot = Arc::new(next);
        true
    }

    /// Finalize a fetch whose download returned.
    pub fn finish_download(&self, downloaded_bytes: u64, total_bytes: Option<u64>) {
        let percent = match total_bytes {
            Some(total) if total > 0 => percent_of(downloaded_bytes, total),
            _ => 100.0,
        };
        self.replace(|current| DownloadProgress {
            active: false,
            phase: DownloadPhase::Downloaded,
            status: "Download complete".to_string(),
            downloaded_bytes,
            total_bytes,
            percent: Some(percent),
            eta_seconds: Some(0),
            ..current.clone()
        });
    }

    /// Mark that the downloaded files are being handed to the backend.
    pub fn mark_loading_model(&self, model_id: &str) {
        self.replace(|current| DownloadProgress {
            active: true,
            phase: DownloadPhase::LoadingModel,
            model: Some(model_id.to_string()),
            status: "Loading model".to_string(),
            ..current.clone()
        });
    }

    /// Mark the pipeline as finished with the model ready.
    pub fn mark_ready(&self) {
        self.replace(|current| DownloadProgress {
            active: false,
            phase: DownloadPhase::Done,
            status: "Ready".to_string(),
            percent: Some(100.0),
            eta_seconds: Some(0),
            ..current.clone()
        });
    }

    /// Mark the pipeline as failed if a record is still active.
    pub fn mark_failed(&self, message: &str) {
        self.replace(|current| {
            if !current.active {
                return current.clone();
            }
            DownloadProgress {
                active: false,
                phase: DownloadPhase::Error,
                status: message.to_string(),
                ..current.clone()
            }
        });
    }
}
