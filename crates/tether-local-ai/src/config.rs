//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::paths;
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Default hub endpoint for model downloads.
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

/// Configuration for the inference backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Path to the llama-server binary.
    pub server_binary: PathBuf,
    /// Placement for model weights (`cpu`, `gpu`, ...).
    pub device: String,
    /// Interface the backend process binds to.
    pub host: String,
    /// Context window handed to the backend.
    pub context_size: u32,
    /// How long to wait for a freshly started backend.
    pub ready_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server_binary: paths::default_llama_server_path(),
            device: "cpu".to_string(),
            host: "127.0.0.1".to_string(),
            context_size: 4096,
            ready_timeout: Duration::from_secs(300),
        }
    }
}

impl BackendConfig {
    /// Number of layers to offload for the configured device.
    pub fn gpu_layers(&self) -> u32 {
        match self.device.as_str() {
            "cpu" => 0,
            _ => 999,
        }
    }
}

/// Configuration for the Tether service.
#[derive(Debug, Clone)]
pub struct TetherConfig {
    /// Bind host for the HTTP API.
    pub host: String,
    /// Bind port for the HTTP API.
    pub port: u16,
    /// Base directory holding one directory per model id.
    pub models_dir: PathBuf,
    /// Hub endpoint used for size discovery and downloads.
    pub hub_endpoint: String,
    /// Optional access token for gated repositories.
    pub hub_token: Option<String>,
    /// Inference backend settings.
    pub backend: BackendConfig,
    /// Maximum prompt length in tokens; longer prompts are truncated.
    pub max_input_tokens: usize,
    /// Tokens generated when a request does not say otherwise.
    pub default_max_new_tokens: u32,
    /// Cadence of the download progress sampler.
    pub sample_interval: Duration,
    /// How long a fetch waits for the sampler to stop.
    pub sampler_stop_timeout: Duration,
    /// Cache repairs allowed per load before giving up.
    pub max_repairs: u32,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            models_dir: paths::default_models_dir(),
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            hub_token: None,
            backend: BackendConfig::default(),
            max_input_tokens: 512,
            default_max_new_tokens: 256,
            sample_interval: Duration::from_secs(1),
            sampler_stop_timeout: Duration::from_secs(1),
            max_repairs: 1,
        }
    }
}

impl TetherConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("TETHER_MODELS_DIR") {
            config.models_dir = PathBuf::from(dir);
        }

        if let Ok(endpoint) = std::env::var("TETHER_HUB_ENDPOINT") {
            config.hub_endpoint = endpoint;
        }

        config.hub_token = std::env::var("HF_TOKEN")
            .or_else(|_| std::env::var("HUGGING_FACE_HUB_TOKEN"))
            .ok()
            .filter(|token| !token.is_empty());

        if let Ok(binary) = std::env::var("TETHER_LLAMA_SERVER") {
            config.backend.server_binary = PathBuf::from(binary);
        }

        if let Ok(device) = std::env::var("TETHER_DEVICE") {
            config.backend.device = device;
        }

        if let Some(repairs) = std::env::var("TETHER_MAX_REPAIRS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_repairs = repairs;
        }

        config
    }

    /// Create a builder for configuration.
    pub fn builder() -> TetherConfigBuilder {
        TetherConfigBuilder::default()
    }
}

/// Builder for [`TetherConfig`].
#[derive(Debug, Default)]
pub struct TetherConfigBuilder {
    config: TetherConfig,
}

impl TetherConfigBuilder {
    /// Start from an existing configuration instead of the defaults.
    pub fn from_config(config: TetherConfig) -> Self {
        Self { config }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn models_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.models_dir = path.into();
        self
    }

    pub fn hub_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.hub_endpoint = endpoint.into();
        self
    }

    pub fn hub_token(mut self, token: Option<String>) -> Self {
        self.config.hub_token = token;
        self
    }

    pub fn server_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backend.server_binary = path.into();
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.backend.device = device.into();
        self
    }

    pub fn max_input_tokens(mut self, tokens: usize) -> Self {
        self.config.max_input_tokens = tokens;
        self
    }

    pub fn default_max_new_tokens(mut self, tokens: u32) -> Self {
        self.config.default_max_new_tokens = tokens;
        self
    }

    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    pub fn sampler_stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.sampler_stop_timeout = timeout;
        self
    }

    pub fn max_repairs(mut self, repairs: u32) -> Self {
        self.config.max_repairs = repairs;
        self
    }

    pub fn build(self) -> TetherConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TetherConfig::default();
        assert_eq!(config.port, 11435);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_input_tokens, 512);
        assert_eq!(config.default_max_new_tokens, 256);
        assert_eq!(config.max_repairs, 1);
        assert!(config.models_dir.ends_with(".tether/models"));
    }

    #[test]
    fn test_builder_pattern() {
        let config = TetherConfig::builder()
            .port(9000)
            .models_dir("/tmp/models")
            .device("gpu")
            .max_repairs(2)
            .build();
        assert_eq!(config.port, 9000);
        assert_eq!(config.models_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.backend.device, "gpu");
        assert_eq!(config.max_repairs, 2);
    }

    #[test]
    fn test_gpu_layers_follow_device() {
        let mut backend = BackendConfig::default();
        assert_eq!(backend.gpu_layers(), 0);
        backend.device = "gpu".to_string();
        assert_eq!(backend.gpu_layers(), 999);
    }
}
