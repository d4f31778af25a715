//! Tether CLI - serve local models behind an Ollama-compatible API.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use tether_local_ai::{TetherConfig, TetherConfigBuilder};

mod commands;

/// Tether - a local model server speaking the Ollama protocol
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides for values read from the environment.
#[derive(Args)]
struct Settings {
    /// Address to bind
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to bind
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Directory holding downloaded models
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Path to the llama-server binary
    #[arg(long, global = true)]
    llama_server: Option<PathBuf>,

    /// Model hub endpoint
    #[arg(long, global = true)]
    hub_endpoint: Option<String>,

    /// Inference device (cpu, cuda, metal)
    #[arg(long, global = true)]
    device: Option<String>,
}

impl Settings {
    fn resolve(self) -> TetherConfig {
        let mut builder = TetherConfigBuilder::from_config(TetherConfig::from_env());
        if let Some(host) = self.host {
            builder = builder.host(host);
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(dir) = self.models_dir {
            builder = builder.models_dir(dir);
        }
        if let Some(path) = self.llama_server {
            builder = builder.server_binary(path);
        }
        if let Some(endpoint) = self.hub_endpoint {
            builder = builder.hub_endpoint(endpoint);
        }
        if let Some(device) = self.device {
            builder = builder.device(device);
        }
        builder.build()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,

    /// Download a model without loading it
    Pull {
        /// Hub repository id, e.g. org/model
        model: String,
    },

    /// List downloaded models
    List,

    /// Show resolved configuration
    Info,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = cli.settings.resolve();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => runtime()?.block_on(commands::serve::run(config)),
        Commands::Pull { model } => runtime()?.block_on(commands::pull::run(&config, &model)),
        Commands::List => commands::list::run(&config),
        Commands::Info => commands::info::run(&config),
    }
}

fn runtime() -> miette::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| miette::miette!("Failed to create async runtime: {}", e))
}
