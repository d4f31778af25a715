//! Serve command - run the HTTP API until interrupted.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tether_local_ai::{
    HubStore, InferenceBackend, LlamaServerBackend, ModelController, TetherConfig,
};
use tether_server::AppState;
use tracing::{info, warn};

pub(crate) async fn run(config: TetherConfig) -> miette::Result<()> {
    let ip: IpAddr = config
        .host
        .parse()
        .map_err(|e| miette::miette!("Invalid host '{}': {}", config.host, e))?;
    let addr = SocketAddr::new(ip, config.port);

    let store = HubStore::with_endpoint(config.hub_endpoint.clone())
        .with_token(config.hub_token.clone());
    let backend = LlamaServerBackend::new(config.backend.clone());
    if !backend.is_available() {
        warn!(
            "llama-server not found at {}; load and inference requests will return 503",
            config.backend.server_binary.display()
        );
    }

    let controller = ModelController::from_config(&config, Arc::new(store), Arc::new(backend));
    info!("Models directory: {}", config.models_dir.display());

    let state = AppState::new(controller.clone(), &config);
    let result = tether_server::serve(state, addr, shutdown_signal()).await;

    info!("Shutting down, releasing resident model");
    controller.release().await;

    result.map_err(|e| miette::miette!("{}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
