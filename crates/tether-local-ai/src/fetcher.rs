//! Fetching model files into the local cache while reporting progress.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::ArtifactStore;
use crate::error::FetchError;
use crate::paths::{self, dir_size};
use crate::progress::{DownloadTracker, SampleMetrics};

/// Downloads models into `models_dir` and keeps a [`DownloadTracker`] current.
pub struct AssetFetcher {
    store: Arc<dyn ArtifactStore>,
    tracker: DownloadTracker,
    models_dir: PathBuf,
    sample_interval: Duration,
    stop_timeout: Duration,
}

impl AssetFetcher {
    /// Create a fetcher with a one-second sampling cadence.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        tracker: DownloadTracker,
        models_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            tracker,
            models_dir: models_dir.into(),
            sample_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(1),
        }
    }

    /// Set how often the sampler measures the destination directory.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set how long a fetch waits for the sampler to exit.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Tracker this fetcher reports to.
    pub fn tracker(&self) -> &DownloadTracker {
        &self.tracker
    }

    /// Base directory holding all models.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Local directory for `model_id`.
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        paths::model_dir(&self.models_dir, model_id)
    }

    /// Ensure every file of `model_id` is present locally and return its directory.
    ///
    /// Always delegates to the store, which skips content already on disk.
    pub async fn fetch(&self, model_id: &str) -> Result<PathBuf, FetchError> {
        fs::create_dir_all(&self.models_dir).map_err(|source| FetchError::Prepare {
            path: self.models_dir.clone(),
            source,
        })?;
        let local_dir = self.model_dir(model_id);
        info!(
            "Ensuring local model download: {} -> {}",
            model_id,
            local_dir.display()
        );

        let total_bytes = match self.store.resolve_size(model_id).await {
            Ok(total) => total.filter(|&t| t > 0),
            Err(e) => {
                warn!("Could not determine size of '{}': {}", model_id, e);
                None
            }
        };

        let initial_bytes = measure(&local_dir).await;
        let started = Instant::now();
        let epoch = self.tracker.begin(model_id, total_bytes, unix_now());

        let sampler = ProgressSampler::spawn(SamplerContext {
            dir: local_dir.clone(),
            initial_bytes,
            total_bytes,
            started,
            epoch,
            tracker: self.tracker.clone(),
            interval: self.sample_interval,
        });

        let result = self.store.download(model_id, &local_dir).await;
        sampler.stop(self.stop_timeout).await;
        result.map_err(|source| FetchError::Download {
            model_id: model_id.to_string(),
            source,
        })?;

        let final_bytes = measure(&local_dir).await.saturating_sub(initial_bytes);
        self.tracker.finish_download(final_bytes, total_bytes);
        info!("Download complete for '{}' ({} new bytes)", model_id, final_bytes);

        Ok(local_dir)
    }
}

struct SamplerContext {
    dir: PathBuf,
    initial_bytes: u64,
    total_bytes: Option<u64>,
    started: Instant,
    epoch: u64,
    tracker: DownloadTracker,
    interval: Duration,
}

/// Background task that turns directory growth into progress snapshots.
///
/// Dropping it without calling [`ProgressSampler::stop`] closes the stop
/// channel, so the task still exits at its next tick.
struct ProgressSampler {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressSampler {
    fn spawn(ctx: SamplerContext) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_sampler(ctx, stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the task and wait up to `timeout` for it to exit.
    async fn stop(self, timeout: Duration) {
        let _ = self.stop_tx.send(());
        if tokio::time::timeout(timeout, self.handle).await.is_err() {
            warn!("Progress sampler did not stop within {:?}", timeout);
        }
    }
}

async fn run_sampler(ctx: SamplerContext, mut stop_rx: oneshot::Receiver<()>) {
    loop {
        let current = measure(&ctx.dir).await;
        let downloaded = current.saturating_sub(ctx.initial_bytes);
        let metrics = SampleMetrics::compute(
            downloaded,
            ctx.total_bytes,
            ctx.started.elapsed().as_secs_f64(),
        );
        debug!(
            "Download progress: {} bytes, {:?}%, eta {:?}s",
            metrics.downloaded_bytes, metrics.percent, metrics.eta_seconds
        );
        ctx.tracker.record_sample(ctx.epoch, metrics);

        tokio::select! {
            _ = &mut stop_rx => break,
            _ = tokio::time::sleep(ctx.interval) => {}
        }
    }
}

/// [`dir_size`] on a blocking worker.
async fn measure(dir: &Path) -> u64 {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || dir_size(&dir))
        .await
        .unwrap_or(0)
}

fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::progress::DownloadPhase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// Writes `chunks` files of `chunk_size` bytes, pausing between them.
    struct SlowStore {
        total: Option<u64>,
        chunks: usize,
        chunk_size: usize,
        pause: Duration,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactStore for SlowStore {
        async fn resolve_size(&self, _repo_id: &str) -> Result<Option<u64>, StoreError> {
            match self.total {
                Some(total) => Ok(Some(total)),
                None => Err(StoreError::Api("metadata unavailable".to_string())),
            }
        }

        async fn download(&self, _repo_id: &str, dest_dir: &Path) -> Result<(), StoreError> {
            fs::create_dir_all(dest_dir)?;
            for i in 0..self.chunks {
                fs::write(dest_dir.join(format!("part-{i}.bin")), vec![1u8; self.chunk_size])?;
                tokio::time::sleep(self.pause).await;
            }
            if self.fail {
                return Err(StoreError::Api("connection reset".to_string()));
            }
            Ok(())
        }
    }

    fn fetcher(store: SlowStore, models_dir: &Path) -> (AssetFetcher, DownloadTracker) {
        let tracker = DownloadTracker::new();
        let fetcher = AssetFetcher::new(Arc::new(store), tracker.clone(), models_dir)
            .with_sample_interval(Duration::from_millis(5))
            .with_stop_timeout(Duration::from_millis(200));
        (fetcher, tracker)
    }

    /// Run `fetch` while recording every snapshot the tracker exposes.
    async fn fetch_observed(
        fetcher: &AssetFetcher,
        tracker: &DownloadTracker,
        model_id: &str,
    ) -> (Result<PathBuf, FetchError>, Vec<crate::DownloadProgress>) {
        let done = Arc::new(AtomicBool::new(false));
        let observer = {
            let done = done.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    seen.push(tracker.snapshot());
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                seen
            })
        };
        let result = fetcher.fetch(model_id).await;
        done.store(true, Ordering::SeqCst);
        (result, observer.await.unwrap())
    }

    #[tokio::test]
    async fn test_fetch_reports_monotonic_percent() {
        let dir = tempdir().unwrap();
        let store = SlowStore {
            total: Some(100),
            chunks: 4,
            chunk_size: 25,
            pause: Duration::from_millis(20),
            fail: false,
        };
        let (fetcher, tracker) = fetcher(store, dir.path());

        let (result, seen) = fetch_observed(&fetcher, &tracker, "org/tiny-model").await;
        let local = result.unwrap();
        assert_eq!(local, dir.path().join("org--tiny-model"));

        let percents: Vec<f64> = seen
            .iter()
            .filter(|s| s.phase == DownloadPhase::Downloading)
            .filter_map(|s| s.percent)
            .collect();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents.iter().all(|p| (0.0..=100.0).contains(p)));

        let last = tracker.snapshot();
        assert_eq!(last.phase, DownloadPhase::Downloaded);
        assert!(!last.active);
        assert_eq!(last.downloaded_bytes, 100);
        assert_eq!(last.percent, Some(100.0));
        assert_eq!(last.eta_seconds, Some(0));
    }

    #[tokio::test]
    async fn test_unknown_size_omits_percent_and_eta() {
        let dir = tempdir().unwrap();
        let store = SlowStore {
            total: None,
            chunks: 3,
            chunk_size: 10,
            pause: Duration::from_millis(20),
            fail: false,
        };
        let (fetcher, tracker) = fetcher(store, dir.path());

        let (result, seen) = fetch_observed(&fetcher, &tracker, "org/m").await;
        result.unwrap();

        let downloading: Vec<_> = seen
            .iter()
            .filter(|s| s.phase == DownloadPhase::Downloading)
            .collect();
        assert!(!downloading.is_empty());
        assert!(downloading.iter().all(|s| s.percent.is_none() && s.eta_seconds.is_none()));
        assert!(downloading.iter().any(|s| s.downloaded_bytes > 0));

        let last = tracker.snapshot();
        assert_eq!(last.total_bytes, None);
        assert_eq!(last.downloaded_bytes, 30);
        assert_eq!(last.percent, Some(100.0));
    }

    #[tokio::test]
    async fn test_existing_bytes_are_not_counted() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("org--m");
        fs::create_dir_all(&local).unwrap();
        fs::write(local.join("already.bin"), vec![0u8; 50]).unwrap();

        let store = SlowStore {
            total: Some(20),
            chunks: 2,
            chunk_size: 10,
            pause: Duration::from_millis(1),
            fail: false,
        };
        let (fetcher, tracker) = fetcher(store, dir.path());
        fetcher.fetch("org/m").await.unwrap();

        assert_eq!(tracker.snapshot().downloaded_bytes, 20);
    }

    #[tokio::test]
    async fn test_download_failure_propagates() {
        let dir = tempdir().unwrap();
        let store = SlowStore {
            total: Some(10),
            chunks: 1,
            chunk_size: 5,
            pause: Duration::from_millis(1),
            fail: true,
        };
        let (fetcher, tracker) = fetcher(store, dir.path());

        let err = fetcher.fetch("org/m").await.unwrap_err();
        assert!(matches!(err, FetchError::Download { .. }));
        // Finalizing the record is the controller's job
        assert!(tracker.snapshot().active);
    }
}
