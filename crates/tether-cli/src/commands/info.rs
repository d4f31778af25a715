//! Info command - show the resolved configuration.

use tether_local_ai::{paths, TetherConfig};

pub(crate) fn run(config: &TetherConfig) -> miette::Result<()> {
    println!("Tether Configuration");
    println!("====================");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!("Listen address:   {}:{}", config.host, config.port);
    println!();
    println!("Data directory:   {}", paths::tether_data_dir().display());
    println!("Models directory: {}", config.models_dir.display());
    println!("Hub endpoint:     {}", config.hub_endpoint);
    println!(
        "Hub token:        {}",
        if config.hub_token.is_some() { "set" } else { "not set" }
    );
    println!();
    println!(
        "Server binary:    {}",
        config.backend.server_binary.display()
    );
    println!("  Exists: {}", config.backend.server_binary.exists());
    println!("Device:           {}", config.backend.device);
    println!("Context size:     {}", config.backend.context_size);

    Ok(())
}
