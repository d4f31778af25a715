//! Running generation against the resident model.

use serde::{Deserialize, Serialize};

use crate::backend::LoadedModel;
use crate::controller::ModelController;
use crate::error::InferenceError;

/// Text produced by one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub text: String,
    pub prompt_token_count: usize,
    pub generated_token_count: usize,
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Render a conversation as a single prompt ending with an `Assistant:` cue.
pub fn flatten_chat(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|msg| format!("{}: {}", capitalize(&msg.role), msg.content))
        .chain(std::iter::once("Assistant:".to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Uppercase the first character and lowercase the rest.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Runs prompts through the model held by a [`ModelController`].
#[derive(Clone)]
pub struct InferenceExecutor {
    controller: ModelController,
    max_input_tokens: usize,
}

impl InferenceExecutor {
    /// Create an executor truncating prompts to `max_input_tokens`.
    pub fn new(controller: ModelController, max_input_tokens: usize) -> Self {
        Self {
            controller,
            max_input_tokens,
        }
    }

    /// Generate up to `max_new_tokens` tokens continuing `prompt`.
    ///
    /// Fails with [`InferenceError::NotLoaded`] unless a model is resident and
    /// ready at the time of the call.
    pub async fn run(
        &self,
        prompt: &str,
        max_new_tokens: u32,
    ) -> Result<GenerationResult, InferenceError> {
        let handle = self.controller.resident().ok_or(InferenceError::NotLoaded)?;
        let prompt = prompt.to_string();
        let max_input_tokens = self.max_input_tokens;

        tokio::task::spawn_blocking(move || {
            generate(handle.model(), &prompt, max_input_tokens, max_new_tokens)
        })
        .await
        .map_err(|e| InferenceError::Worker(e.to_string()))?
    }

    /// Flatten `messages` with [`flatten_chat`] and run the result.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        max_new_tokens: u32,
    ) -> Result<GenerationResult, InferenceError> {
        self.run(&flatten_chat(messages), max_new_tokens).await
    }
}

fn generate(
    model: &dyn LoadedModel,
    prompt: &str,
    max_input_tokens: usize,
    max_new_tokens: u32,
) -> Result<GenerationResult, InferenceError> {
    let mut input = model.tokenize(prompt, max_input_tokens)?;
    input.truncate(max_input_tokens);
    let prompt_len = input.len();

    let sequence = model.generate(&input, max_new_tokens)?;
    let continuation = sequence.get(prompt_len..).unwrap_or_default();
    let text = model.decode(continuation)?;

    Ok(GenerationResult {
        text: text.trim().to_string(),
        prompt_token_count: prompt_len,
        generated_token_count: continuation.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::AssetFetcher;
    use crate::progress::DownloadTracker;
    use crate::repair::SnapshotRepairPolicy;
    use crate::testing::{MemoryStore, ScriptedBackend};
    use crate::BackendError;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn executor(backend: Arc<ScriptedBackend>, models_dir: &std::path::Path) -> InferenceExecutor {
        let fetcher = AssetFetcher::new(
            Arc::new(MemoryStore::new()),
            DownloadTracker::new(),
            models_dir,
        );
        let controller = ModelController::new(backend, fetcher, SnapshotRepairPolicy::default());
        InferenceExecutor::new(controller, 4)
    }

    #[test]
    fn test_flatten_chat() {
        let messages = vec![
            ChatMessage::new("user", "Hi"),
            ChatMessage::new("assistant", "Hello"),
        ];
        assert_eq!(flatten_chat(&messages), "User: Hi\nAssistant: Hello\nAssistant:");
    }

    #[test]
    fn test_flatten_chat_roles() {
        let messages = vec![ChatMessage::new("SYSTEM", "Be brief")];
        assert_eq!(flatten_chat(&messages), "System: Be brief\nAssistant:");
        assert_eq!(flatten_chat(&[]), "Assistant:");
    }

    #[tokio::test]
    async fn test_run_without_model_is_not_loaded() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let executor = executor(backend.clone(), dir.path());

        let err = executor.run("hello", 8).await.unwrap_err();
        assert!(matches!(err, InferenceError::NotLoaded));
        assert_eq!(backend.tokenize_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_counts_and_trims() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new().with_reply("the answer is 42"));
        let executor = executor(backend.clone(), dir.path());
        executor.controller.load("org/m").await.unwrap();

        let result = executor.run("what is the answer", 3).await.unwrap();
        assert_eq!(result.text, "the answer is");
        assert_eq!(result.prompt_token_count, 4);
        assert_eq!(result.generated_token_count, 3);
        assert_eq!(backend.tokenize_calls(), 1);
    }

    #[tokio::test]
    async fn test_prompt_is_truncated() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let executor = executor(backend, dir.path());
        executor.controller.load("org/m").await.unwrap();

        let result = executor.run("one two three four five six", 1).await.unwrap();
        assert_eq!(result.prompt_token_count, 4);
    }

    #[tokio::test]
    async fn test_backend_failure_is_wrapped() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let executor = executor(backend.clone(), dir.path());
        executor.controller.load("org/m").await.unwrap();

        backend.fail_generation(BackendError::Api("CUDA out of memory".into()));
        let err = executor.run("hi", 4).await.unwrap_err();
        assert!(matches!(err, InferenceError::Backend(_)));
        assert!(err.to_string().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_chat_uses_flattened_prompt() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let executor = executor(backend.clone(), dir.path());
        executor.controller.load("org/m").await.unwrap();

        let messages = vec![ChatMessage::new("user", "Hi")];
        let result = executor.chat(&messages, 2).await.unwrap();
        // "User: Hi\nAssistant:" has three whitespace-separated words
        assert_eq!(result.prompt_token_count, 3);
    }
}
