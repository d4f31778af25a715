//! Model downloads from a Hugging Face compatible hub.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::backend::ArtifactStore;
use crate::config::DEFAULT_HUB_ENDPOINT;
use crate::error::StoreError;

/// Repository metadata returned by `GET /api/models/{repo}?blobs=true`.
#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

/// One file of a repository.
#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    sha256: String,
    #[serde(default)]
    size: Option<u64>,
}

impl Sibling {
    fn expected_size(&self) -> Option<u64> {
        self.size.or_else(|| self.lfs.as_ref().and_then(|lfs| lfs.size))
    }

    fn sha256(&self) -> Option<&str> {
        self.lfs.as_ref().map(|lfs| lfs.sha256.as_str())
    }
}

impl RepoInfo {
    /// Sum of all known file sizes, `None` when nothing is known.
    fn total_size(&self) -> Option<u64> {
        let total: u64 = self.siblings.iter().filter_map(Sibling::expected_size).sum();
        (total > 0).then_some(total)
    }
}

/// [`ArtifactStore`] backed by the Hugging Face Hub HTTP API.
pub struct HubStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    revision: String,
}

impl HubStore {
    /// Create a store for the public hub.
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_HUB_ENDPOINT)
    }

    /// Create a store for a custom hub endpoint or mirror.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: None,
            revision: "main".to_string(),
        }
    }

    /// Authenticate requests with a bearer token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Download a specific revision instead of `main`.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Get the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn info_url(&self, repo_id: &str) -> String {
        format!("{}/api/models/{}/revision/{}", self.endpoint, repo_id, self.revision)
    }

    fn file_url(&self, repo_id: &str, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, repo_id, self.revision, file
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn repo_info(&self, repo_id: &str) -> Result<RepoInfo, StoreError> {
        let response = self
            .get(&self.info_url(repo_id))
            .query(&[("blobs", "true")])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => {
                Err(StoreError::RepoNotFound(repo_id.to_string()))
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(StoreError::Api(format!("{}: {}", status, text)))
            }
        }
    }

    async fn download_file(
        &self,
        repo_id: &str,
        sibling: &Sibling,
        dest_dir: &Path,
    ) -> Result<(), StoreError> {
        let dest_path = dest_dir.join(&sibling.rfilename);

        if let Ok(meta) = fs::metadata(&dest_path) {
            match sibling.expected_size() {
                Some(expected) if meta.len() != expected => {
                    debug!("Re-downloading {} (size mismatch)", sibling.rfilename);
                }
                _ => {
                    debug!("Skipping {} (already present)", sibling.rfilename);
                    return Ok(());
                }
            }
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let url = self.file_url(repo_id, &sibling.rfilename);
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Api(format!("HTTP {}: {}", response.status(), url)));
        }

        // Write to a sibling temp file so an interrupted download never looks complete
        let part_path = part_path(&dest_path);
        let mut file = File::create(&part_path)?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)?;
            hasher.update(&chunk);
        }
        file.flush()?;
        drop(file);

        if let Some(expected) = sibling.sha256() {
            let actual = hex::encode(hasher.finalize());
            if actual != expected {
                let _ = fs::remove_file(&part_path);
                return Err(StoreError::ChecksumMismatch {
                    file: sibling.rfilename.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
            debug!("Checksum verified for {}: {}", sibling.rfilename, actual);
        }

        fs::rename(&part_path, &dest_path)?;
        Ok(())
    }
}

impl Default for HubStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for HubStore {
    async fn resolve_size(&self, repo_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.repo_info(repo_id).await?.total_size())
    }

    async fn download(&self, repo_id: &str, dest_dir: &Path) -> Result<(), StoreError> {
        let info = self.repo_info(repo_id).await?;
        fs::create_dir_all(dest_dir)?;

        info!(
            "Downloading {} files of '{}' to {}",
            info.siblings.len(),
            repo_id,
            dest_dir.display()
        );

        for sibling in &info.siblings {
            if !is_safe_relative(&sibling.rfilename) {
                warn!("Skipping file with unsafe path: {}", sibling.rfilename);
                continue;
            }
            self.download_file(repo_id, sibling, dest_dir).await?;
        }

        info!("Repository '{}' is up to date", repo_id);
        Ok(())
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Whether `file` stays inside the destination directory.
fn is_safe_relative(file: &str) -> bool {
    Path::new(file)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}
