//! Capability interfaces for the external collaborators: the remote artifact
//! store and the inference engine.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{BackendError, StoreError};

/// Remote store that model files are fetched from.
///
/// Progress is not reported through this interface; callers watch the
/// destination directory instead.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Total size in bytes of the repository's files, if the store knows it.
    async fn resolve_size(&self, repo_id: &str) -> Result<Option<u64>, StoreError>;

    /// Download every file of `repo_id` into `dest_dir`, skipping files that
    /// are already present.
    async fn download(&self, repo_id: &str, dest_dir: &Path) -> Result<(), StoreError>;
}

/// An inference engine that can turn a model directory into a [`LoadedModel`].
///
/// Methods block; callers run them on a blocking worker.
pub trait InferenceBackend: Send + Sync {
    /// Whether the engine is installed and usable.
    fn is_available(&self) -> bool;

    /// Load the model stored in `dir`.
    fn load(&self, dir: &Path) -> Result<Box<dyn LoadedModel>, BackendError>;
}

/// A model resident in the inference engine.
pub trait LoadedModel: Send + Sync {
    /// Tokenize `text`, keeping at most `max_len` tokens.
    fn tokenize(&self, text: &str, max_len: usize) -> Result<Vec<u32>, BackendError>;

    /// Generate up to `max_new_tokens` tokens after `prompt`.
    ///
    /// Returns the full sequence: the prompt tokens followed by the continuation.
    fn generate(&self, prompt: &[u32], max_new_tokens: u32) -> Result<Vec<u32>, BackendError>;

    /// Decode tokens to text with special tokens stripped.
    fn decode(&self, tokens: &[u32]) -> Result<String, BackendError>;

    /// Free the engine resources held by this model.
    fn release(&self);
}
