//! In-memory collaborators for exercising the lifecycle without a network or
//! a real inference engine.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{ArtifactStore, InferenceBackend, LoadedModel};
use crate::error::{BackendError, StoreError};

/// Token ids at or above this value are generated text.
const REPLY_BASE: u32 = 1000;

/// An [`ArtifactStore`] serving a fixed set of files.
pub struct MemoryStore {
    files: Vec<(String, Vec<u8>)>,
    known_size: bool,
    delay: Duration,
    downloads: AtomicUsize,
}

impl MemoryStore {
    /// A repository with a config file and a small gguf file.
    pub fn new() -> Self {
        Self {
            files: vec![
                ("config.json".to_string(), b"{}".to_vec()),
                ("model.gguf".to_string(), vec![0u8; 64]),
            ],
            known_size: true,
            delay: Duration::ZERO,
            downloads: AtomicUsize::new(0),
        }
    }

    /// Add a file at `path` relative to the repository root.
    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push((path.to_string(), content.to_vec()));
        self
    }

    /// Make every download take at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make size discovery fail.
    pub fn with_unknown_size(mut self) -> Self {
        self.known_size = false;
        self
    }

    /// Number of download calls so far.
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn resolve_size(&self, repo_id: &str) -> Result<Option<u64>, StoreError> {
        if !self.known_size {
            return Err(StoreError::RepoNotFound(repo_id.to_string()));
        }
        Ok(Some(self.files.iter().map(|(_, c)| c.len() as u64).sum()))
    }

    async fn download(&self, _repo_id: &str, dest_dir: &Path) -> Result<(), StoreError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        for (name, content) in &self.files {
            let path = dest_dir.join(name);
            if path.exists() {
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
        }
        Ok(())
    }
}

/// An [`InferenceBackend`] whose failures are scripted ahead of time.
///
/// Records `load:<dir>` and `release:<dir>` events in order.
pub struct ScriptedBackend {
    available: bool,
    reply: String,
    failures: Mutex<VecDeque<BackendError>>,
    generation_failure: Arc<Mutex<Option<BackendError>>>,
    events: Arc<Mutex<Vec<String>>>,
    loads: AtomicUsize,
    tokenize_calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            available: true,
            reply: "hello from the model".to_string(),
            failures: Mutex::new(VecDeque::new()),
            generation_failure: Arc::new(Mutex::new(None)),
            events: Arc::new(Mutex::new(Vec::new())),
            loads: AtomicUsize::new(0),
            tokenize_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend that reports itself as not installed.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Words the model generates, in order.
    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    /// Fail the next load that has no earlier scripted failure.
    pub fn fail_next(self, error: BackendError) -> Self {
        self.push_failure(error);
        self
    }

    /// Queue a load failure on a shared backend.
    pub fn push_failure(&self, error: BackendError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Fail the next generation call of any loaded model.
    pub fn fail_generation(&self, error: BackendError) {
        *self
            .generation_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn tokenize_calls(&self) -> usize {
        self.tokenize_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn is_available(&self) -> bool {
        self.available
    }

    fn load(&self, dir: &Path) -> Result<Box<dyn LoadedModel>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("load:{name}"));

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        Ok(Box::new(EchoModel {
            name,
            reply: self.reply.split_whitespace().map(str::to_string).collect(),
            generation_failure: Arc::clone(&self.generation_failure),
            events: Arc::clone(&self.events),
            tokenize_calls: Arc::clone(&self.tokenize_calls),
        }))
    }
}

/// One token per whitespace-separated word; generates the scripted reply.
struct EchoModel {
    name: String,
    reply: Vec<String>,
    generation_failure: Arc<Mutex<Option<BackendError>>>,
    events: Arc<Mutex<Vec<String>>>,
    tokenize_calls: Arc<AtomicUsize>,
}

impl LoadedModel for EchoModel {
    fn tokenize(&self, text: &str, max_len: usize) -> Result<Vec<u32>, BackendError> {
        self.tokenize_calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..)
            .zip(text.split_whitespace())
            .map(|(id, _)| id)
            .take(max_len)
            .collect())
    }

    fn generate(&self, prompt: &[u32], max_new_tokens: u32) -> Result<Vec<u32>, BackendError> {
        let failure = self
            .generation_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = failure {
            return Err(error);
        }

        let count = (max_new_tokens as usize).min(self.reply.len()) as u32;
        let mut sequence = prompt.to_vec();
        sequence.extend((0..count).map(|i| REPLY_BASE + i));
        Ok(sequence)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BackendError> {
        let words: Vec<&str> = tokens
            .iter()
            .filter_map(|&t| t.checked_sub(REPLY_BASE))
            .filter_map(|i| self.reply.get(i as usize))
            .map(String::as_str)
            .collect();
        Ok(format!(" {} \n", words.join(" ")))
    }

    fn release(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("release:{}", self.name));
    }
}
