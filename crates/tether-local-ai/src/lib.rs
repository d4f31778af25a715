//! Model lifecycle for Tether.
//!
//! This crate owns the single resident model behind the Ollama-compatible
//! API: it fetches model files into a local cache while tracking progress,
//! repairs caches left incomplete by interrupted downloads, loads and swaps
//! models, and runs generation against whichever model is resident.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ ModelController │ --> │  AssetFetcher   │ --> │  ArtifactStore  │
//! │ (load / swap)   │     │ (+ sampler)     │     │  (HubStore)     │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │
//!         │               ┌───────┴─────────┐
//!         │               │ DownloadTracker │
//!         │               └─────────────────┘
//!         ├──> SnapshotRepairPolicy
//!         └──> InferenceBackend (LlamaServerBackend)
//!                     ^
//!              InferenceExecutor
//! ```

mod backend;
mod config;
mod controller;
mod error;
mod executor;
mod fetcher;
mod hub;
mod llama;
pub mod paths;
mod progress;
mod repair;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{ArtifactStore, InferenceBackend, LoadedModel};
pub use config::{BackendConfig, TetherConfig, TetherConfigBuilder, DEFAULT_HUB_ENDPOINT};
pub use controller::{LoadOutcome, ModelController, ModelHandle};
pub use error::{BackendError, FetchError, InferenceError, LoadError, StoreError};
pub use executor::{flatten_chat, ChatMessage, GenerationResult, InferenceExecutor};
pub use fetcher::AssetFetcher;
pub use hub::HubStore;
pub use llama::LlamaServerBackend;
pub use progress::{DownloadPhase, DownloadProgress, DownloadTracker, SampleMetrics};
pub use repair::{RepairAction, SnapshotRepairPolicy};

/// Default port for the Tether API.
pub const DEFAULT_PORT: u16 = 11435;

/// Default bind host for the Tether API.
pub const DEFAULT_HOST: &str = "127.0.0.1";
