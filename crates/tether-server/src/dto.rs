//! Request and response bodies of the Ollama wire protocol.

use serde::{Deserialize, Serialize};
use tether_local_ai::{ChatMessage, GenerationResult};

/// `GET /health`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend_available: bool,
    pub model_loaded: bool,
    pub model_id: Option<String>,
    pub loading: bool,
}

/// `GET /api/tags`
#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub models: Vec<ModelTag>,
}

#[derive(Debug, Serialize)]
pub struct ModelTag {
    pub name: String,
    pub model: String,
    pub modified_at: String,
    pub size: u64,
    pub digest: String,
    pub details: ModelDetails,
}

#[derive(Debug, Serialize)]
pub struct ModelDetails {
    pub format: &'static str,
    pub family: &'static str,
    pub families: Vec<&'static str>,
    pub parameter_size: &'static str,
    pub quantization_level: &'static str,
}

impl ModelTag {
    pub fn resident(model_id: &str, modified_at: String) -> Self {
        Self {
            name: model_id.to_string(),
            model: model_id.to_string(),
            modified_at,
            size: 0,
            digest: String::new(),
            details: ModelDetails {
                format: "gguf",
                family: "huggingface",
                families: vec!["huggingface"],
                parameter_size: "unknown",
                quantization_level: "none",
            },
        }
    }
}

/// `POST /api/load`
#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    /// Hub repository id, e.g. `meta-llama/Llama-3.2-1B`.
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub status: &'static str,
    pub model: String,
}

/// Generation options. Only `num_predict` changes behavior.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateOptions {
    pub num_predict: Option<i64>,
    #[allow(dead_code)]
    pub temperature: Option<f32>,
}

/// `POST /api/generate`
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
    pub max_new_tokens: Option<u32>,
    #[allow(dead_code)]
    pub temperature: Option<f32>,
    pub options: Option<GenerateOptions>,
}

/// `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    pub max_new_tokens: Option<u32>,
    pub options: Option<GenerateOptions>,
}

/// Token budget for a request: a positive `options.num_predict` wins over
/// `max_new_tokens`, which wins over `default`.
pub fn token_budget(
    max_new_tokens: Option<u32>,
    options: Option<&GenerateOptions>,
    default: u32,
) -> u32 {
    let num_predict = options
        .and_then(|o| o.num_predict)
        .filter(|&n| n > 0)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
    num_predict.or(max_new_tokens).unwrap_or(default)
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub model: String,
    pub created_at: String,
    pub response: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<&'static str>,
    pub prompt_eval_count: usize,
    pub eval_count: usize,
}

impl GenerateResponse {
    pub fn finished(model: &str, created_at: String, result: GenerationResult) -> Self {
        Self {
            model: model.to_string(),
            created_at,
            response: result.text,
            done: true,
            done_reason: Some("stop"),
            prompt_eval_count: result.prompt_token_count,
            eval_count: result.generated_token_count,
        }
    }

    /// The `done: false` chunk sent ahead of the final response.
    pub fn placeholder(&self) -> Self {
        Self {
            response: String::new(),
            done: false,
            done_reason: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub model: String,
    pub created_at: String,
    pub message: ChatMessage,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<&'static str>,
    pub prompt_eval_count: usize,
    pub eval_count: usize,
}

impl ChatResponse {
    pub fn finished(model: &str, created_at: String, result: GenerationResult) -> Self {
        Self {
            model: model.to_string(),
            created_at,
            message: ChatMessage::new("assistant", result.text),
            done: true,
            done_reason: Some("stop"),
            prompt_eval_count: result.prompt_token_count,
            eval_count: result.generated_token_count,
        }
    }

    /// The `done: false` chunk sent ahead of the final response.
    pub fn placeholder(&self) -> Self {
        Self {
            message: ChatMessage::new("assistant", ""),
            done: false,
            done_reason: None,
            ..self.clone()
        }
    }
}
