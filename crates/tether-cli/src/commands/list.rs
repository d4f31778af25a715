//! List command - show models present in the models directory.

use std::fs;

use indicatif::HumanBytes;
use tether_local_ai::paths::{self, MODEL_DIR_SEPARATOR};
use tether_local_ai::TetherConfig;

pub(crate) fn run(config: &TetherConfig) -> miette::Result<()> {
    let entries = match fs::read_dir(&config.models_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No models downloaded.");
            return Ok(());
        }
        Err(e) => return Err(miette::miette!("Failed to list models: {}", e)),
    };

    let mut models: Vec<(String, u64)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| {
            let name = entry
                .file_name()
                .to_string_lossy()
                .replace(MODEL_DIR_SEPARATOR, "/");
            (name, paths::dir_size(&entry.path()))
        })
        .collect();
    models.sort();

    if models.is_empty() {
        println!("No models downloaded.");
        println!();
        println!("To download a model, run:");
        println!("  tether pull <org/model>");
        return Ok(());
    }

    println!("Downloaded models:");
    for (name, size) in models {
        println!("  - {:<48} {}", name, HumanBytes(size));
    }
    println!();
    println!("Models directory: {}", config.models_dir.display());

    Ok(())
}
