//! Path utilities for Tether data directories.

use std::path::{Path, PathBuf};

/// Separator substituted for `/` when a model id becomes a directory name.
pub const MODEL_DIR_SEPARATOR: &str = "--";

/// Get the Tether data directory (~/.tether/).
///
/// Falls back to a relative `.tether` when no home directory is known.
pub fn tether_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".tether"))
        .unwrap_or_else(|| PathBuf::from(".tether"))
}

/// Get the default models directory (~/.tether/models/).
pub fn default_models_dir() -> PathBuf {
    tether_data_dir().join("models")
}

/// Get the bin directory (~/.tether/bin/).
pub fn bin_dir() -> PathBuf {
    tether_data_dir().join("bin")
}

/// Get the default path to the llama-server binary.
pub fn default_llama_server_path() -> PathBuf {
    let binary_name = if cfg!(target_os = "windows") {
        "llama-server.exe"
    } else {
        "llama-server"
    };
    bin_dir().join(binary_name)
}

/// Map a model id such as `org/name` to a single path segment (`org--name`).
pub fn model_dir_name(model_id: &str) -> String {
    model_id.replace('/', MODEL_DIR_SEPARATOR)
}

/// Get the local directory for a model under `models_dir`.
pub fn model_dir(models_dir: &Path, model_id: &str) -> PathBuf {
    models_dir.join(model_dir_name(model_id))
}

/// Total size of all regular files under `path`, recursively.
///
/// Entries that vanish or cannot be read during the walk are skipped.
pub fn dir_size(path: &Path) -> u64 {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| match entry.file_type() {
            Ok(kind) if kind.is_dir() => dir_size(&entry.path()),
            Ok(kind) if kind.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_model_dir_name() {
        assert_eq!(model_dir_name("org/tiny-model"), "org--tiny-model");
        assert_eq!(model_dir_name("plain"), "plain");
    }

    #[test]
    fn test_model_dir() {
        let base = Path::new("/data/models");
        assert_eq!(
            model_dir(base, "meta-llama/Llama-3.2-1B"),
            PathBuf::from("/data/models/meta-llama--Llama-3.2-1B")
        );
    }

    #[test]
    fn test_dir_size_recursive() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 10]).unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(dir.path().join("nested/b.bin"), vec![0u8; 5]).unwrap();
        std::fs::write(dir.path().join("nested/deeper/c.bin"), vec![0u8; 7]).unwrap();

        assert_eq!(dir_size(dir.path()), 22);
    }

    #[test]
    fn test_dir_size_missing_is_zero() {
        let dir = tempdir().unwrap();
        assert_eq!(dir_size(&dir.path().join("nope")), 0);
    }
}
