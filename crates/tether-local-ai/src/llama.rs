//! Inference backend that serves each model from a private llama-server process.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{InferenceBackend, LoadedModel};
use crate::config::BackendConfig;
use crate::error::BackendError;

/// [`InferenceBackend`] that spawns `llama-server` for a model's gguf file.
pub struct LlamaServerBackend {
    config: BackendConfig,
}

impl LlamaServerBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

impl InferenceBackend for LlamaServerBackend {
    fn is_available(&self) -> bool {
        self.config.server_binary.exists()
    }

    fn load(&self, dir: &Path) -> Result<Box<dyn LoadedModel>, BackendError> {
        let server_path = &self.config.server_binary;
        if !server_path.exists() {
            return Err(BackendError::NotInstalled(server_path.display().to_string()));
        }

        let model = find_gguf(dir).ok_or_else(|| BackendError::MissingFile {
            path: Some(dir.join("*.gguf")),
        })?;
        let port = free_port(&self.config.host)?;

        info!(
            "Starting llama-server on port {} with model {} ({})",
            port,
            model.display(),
            self.config.device
        );

        let child = Command::new(server_path)
            .arg("--model")
            .arg(&model)
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(port.to_string())
            .arg("--ctx-size")
            .arg(self.config.context_size.to_string())
            .arg("--n-gpu-layers")
            .arg(self.config.gpu_layers().to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BackendError::StartFailed(e.to_string()))?;

        debug!("llama-server process started with PID: {}", child.id());

        let loaded = LlamaServerModel {
            process: Mutex::new(Some(child)),
            client: LlamaClient::new(format!("http://{}:{}", self.config.host, port)),
        };
        loaded.wait_ready(self.config.ready_timeout)?;

        Ok(Box::new(loaded))
    }
}

/// First `*.gguf` file under `dir`, searching recursively in name order.
fn find_gguf(dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) =
        entries.into_iter().partition(|path| path.is_dir());

    files
        .into_iter()
        .find(|path| path.extension().map(|ext| ext == "gguf").unwrap_or(false))
        .or_else(|| dirs.iter().find_map(|sub| find_gguf(sub)))
}

fn free_port(host: &str) -> Result<u16, BackendError> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

/// A model served by a running llama-server process.
struct LlamaServerModel {
    process: Mutex<Option<Child>>,
    client: LlamaClient,
}

impl LlamaServerModel {
    fn wait_ready(&self, timeout: Duration) -> Result<(), BackendError> {
        let start = Instant::now();
        let check_interval = Duration::from_millis(500);

        info!("Waiting for llama-server to become ready...");

        while start.elapsed() < timeout {
            if let Some(status) = self.exit_status() {
                return Err(BackendError::StartFailed(format!(
                    "llama-server exited with {status}"
                )));
            }
            if self.client.check_health().is_ok() {
                info!("llama-server is ready");
                return Ok(());
            }
            std::thread::sleep(check_interval);
        }

        self.stop();
        Err(BackendError::StartTimeout)
    }

    fn exit_status(&self) -> Option<std::process::ExitStatus> {
        let mut process = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        process.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    /// Stop the server process.
    fn stop(&self) {
        let child = self
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else {
            return;
        };

        info!("Stopping llama-server (PID: {})", child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            unsafe {
                libc::kill(child.id() as i32, libc::SIGTERM);
            }
            std::thread::sleep(Duration::from_millis(500));
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Server exited with status: {:?}", status);
            }
            Ok(None) => {
                warn!("Server didn't exit gracefully, killing...");
                let _ = child.kill();
                let _ = child.wait();
            }
            Err(e) => {
                warn!("Error checking server status: {}", e);
                let _ = child.kill();
            }
        }
    }
}

impl LoadedModel for LlamaServerModel {
    fn tokenize(&self, text: &str, max_len: usize) -> Result<Vec<u32>, BackendError> {
        let mut tokens = self.client.tokenize(text)?;
        tokens.truncate(max_len);
        Ok(tokens)
    }

    fn generate(&self, prompt: &[u32], max_new_tokens: u32) -> Result<Vec<u32>, BackendError> {
        let generated = self.client.complete(prompt, max_new_tokens)?;
        let mut sequence = prompt.to_vec();
        sequence.extend(generated);
        Ok(sequence)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BackendError> {
        self.client.detokenize(tokens)
    }

    fn release(&self) {
        self.stop();
    }
}

impl Drop for LlamaServerModel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Blocking client for the llama-server HTTP API.
struct LlamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    content: &'a str,
    add_special: bool,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a [u32],
    n_predict: u32,
    return_tokens: bool,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    tokens: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct DetokenizeRequest<'a> {
    tokens: &'a [u32],
}

#[derive(Debug, Deserialize)]
struct DetokenizeResponse {
    content: String,
}

impl LlamaClient {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn check_health(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Api(format!("health check: {}", response.status())))
        }
    }

    fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, BackendError>
    where
        Req: Serialize + ?Sized,
        Resp: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(BackendError::Api(format!("{}: {}", status, text)));
        }

        Ok(response.json()?)
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>, BackendError> {
        let request = TokenizeRequest {
            content: text,
            add_special: true,
        };
        let response: TokenizeResponse = self.post("/tokenize", &request)?;
        Ok(response.tokens)
    }

    fn complete(&self, prompt: &[u32], max_new_tokens: u32) -> Result<Vec<u32>, BackendError> {
        let request = CompletionRequest {
            prompt,
            n_predict: max_new_tokens,
            return_tokens: true,
            stream: false,
        };
        let response: CompletionResponse = self.post("/completion", &request)?;
        Ok(response.tokens)
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String, BackendError> {
        let response: DetokenizeResponse =
            self.post("/detokenize", &DetokenizeRequest { tokens })?;
        Ok(response.content)
    }
}
