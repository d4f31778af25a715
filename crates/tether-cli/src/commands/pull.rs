//! Pull command - download a model into the models directory.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tether_local_ai::{AssetFetcher, DownloadProgress, DownloadTracker, HubStore, TetherConfig};

pub(crate) async fn run(config: &TetherConfig, model: &str) -> miette::Result<()> {
    let store = HubStore::with_endpoint(config.hub_endpoint.clone())
        .with_token(config.hub_token.clone());
    let tracker = DownloadTracker::new();
    let fetcher = AssetFetcher::new(Arc::new(store), tracker.clone(), &config.models_dir)
        .with_sample_interval(config.sample_interval)
        .with_stop_timeout(config.sampler_stop_timeout);

    println!("Downloading model: {}", model);
    println!("This may take a while depending on your connection...");
    println!();

    let mut bar = DownloadBar::new(ProgressBar::new_spinner())?;
    bar.pb.enable_steady_tick(Duration::from_millis(120));

    let fetch = fetcher.fetch(model);
    tokio::pin!(fetch);
    let mut ticker = tokio::time::interval(config.sample_interval);

    let result = loop {
        tokio::select! {
            result = &mut fetch => break result,
            _ = ticker.tick() => bar.update(&tracker.snapshot()),
        }
    };

    let dir = match result {
        Ok(dir) => dir,
        Err(e) => {
            bar.pb.abandon();
            return Err(miette::miette!("Failed to download model: {}", e));
        }
    };

    let progress = tracker.snapshot();
    bar.finish(&progress);
    println!();
    println!(
        "Downloaded {} to {}",
        HumanBytes(progress.downloaded_bytes),
        dir.display()
    );

    Ok(())
}

/// A spinner that becomes a bar once the total size is known.
struct DownloadBar {
    pb: ProgressBar,
    bar_style: ProgressStyle,
    sized: bool,
}

impl DownloadBar {
    fn new(pb: ProgressBar) -> miette::Result<Self> {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {bytes} downloaded")
            .map_err(|e| miette::miette!("Invalid progress bar template: {}", e))?;
        let bar_style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .map_err(|e| miette::miette!("Invalid progress bar template: {}", e))?
            .progress_chars("#>-");

        pb.set_style(spinner_style);
        Ok(Self {
            pb,
            bar_style,
            sized: false,
        })
    }

    fn update(&mut self, progress: &DownloadProgress) {
        if let (false, Some(total)) = (self.sized, progress.total_bytes) {
            self.pb.set_length(total);
            self.pb.set_style(self.bar_style.clone());
            self.sized = true;
        }
        self.pb.set_position(progress.downloaded_bytes);
    }

    fn finish(&mut self, progress: &DownloadProgress) {
        self.update(progress);
        self.pb.finish_with_message("Download complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(downloaded_bytes: u64, total_bytes: Option<u64>) -> DownloadProgress {
        DownloadProgress {
            active: true,
            downloaded_bytes,
            total_bytes,
            ..DownloadProgress::default()
        }
    }

    #[test]
    fn test_bar_follows_tracker_snapshots() {
        let mut bar = DownloadBar::new(ProgressBar::hidden()).unwrap();

        bar.update(&progress(100, None));
        assert!(!bar.sized);
        assert_eq!(bar.pb.position(), 100);

        bar.update(&progress(512, Some(2048)));
        assert!(bar.sized);
        assert_eq!(bar.pb.length(), Some(2048));
        assert_eq!(bar.pb.position(), 512);

        bar.finish(&progress(2048, Some(2048)));
        assert_eq!(bar.pb.position(), 2048);
        assert!(bar.pb.is_finished());
    }
}
