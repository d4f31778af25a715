//! Recovery policy for partially written local model caches.
//!
//! A missing-file failure while the backend loads a downloaded directory means
//! an interrupted download left the cache incomplete. The policy clears the
//! narrowest damaged directory it can identify and asks for one more fetch.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

/// Directory segment under which cache trees keep revisions.
const SNAPSHOTS_SEGMENT: &str = "snapshots";

/// What to do after a missing-file failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// Delete this snapshot revision directory, then fetch and load again.
    RemoveSnapshotAndRetry(PathBuf),
    /// Delete the whole local model directory, then fetch and load again.
    RemoveModelDirAndRetry,
    /// Repairs are exhausted.
    GiveUp,
}

/// Decides how to recover from a missing-file failure during load.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRepairPolicy {
    max_repairs: u32,
}

impl Default for SnapshotRepairPolicy {
    fn default() -> Self {
        Self { max_repairs: 1 }
    }
}

impl SnapshotRepairPolicy {
    /// Create a policy allowing `max_repairs` repairs per load.
    pub fn new(max_repairs: u32) -> Self {
        Self { max_repairs }
    }

    /// Repairs allowed per load.
    pub fn max_repairs(&self) -> u32 {
        self.max_repairs
    }

    /// Classify a failure that named `missing` (if it named a path), given how
    /// many repairs this load has already made.
    pub fn decide(&self, missing: Option<&Path>, repairs_made: u32) -> RepairAction {
        if repairs_made >= self.max_repairs {
            return RepairAction::GiveUp;
        }

        match missing.and_then(snapshot_dir_of) {
            Some(snapshot) => RepairAction::RemoveSnapshotAndRetry(snapshot),
            None => RepairAction::RemoveModelDirAndRetry,
        }
    }

    /// Carry out `action` for the model stored in `model_dir`.
    ///
    /// A snapshot that is already gone or cannot be removed falls back to
    /// removing `model_dir`. Returns the directory that was cleared.
    pub fn apply(&self, action: &RepairAction, model_dir: &Path) -> Option<PathBuf> {
        match action {
            RepairAction::RemoveSnapshotAndRetry(snapshot) => {
                if snapshot.exists() {
                    match fs::remove_dir_all(snapshot) {
                        Ok(()) => {
                            info!("Removed corrupt snapshot: {}", snapshot.display());
                            return Some(snapshot.clone());
                        }
                        Err(e) => {
                            warn!("Failed to remove snapshot {}: {}", snapshot.display(), e);
                        }
                    }
                }
                remove_model_dir(model_dir)
            }
            RepairAction::RemoveModelDirAndRetry => remove_model_dir(model_dir),
            RepairAction::GiveUp => None,
        }
    }
}

/// The `.../snapshots/<rev>` prefix of `path`, if it has one.
pub fn snapshot_dir_of(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();
    let idx = components
        .iter()
        .position(|c| c.as_os_str() == SNAPSHOTS_SEGMENT)?;

    match components.get(idx + 1) {
        Some(Component::Normal(_)) => Some(components[..idx + 2].iter().collect()),
        _ => None,
    }
}

fn remove_model_dir(model_dir: &Path) -> Option<PathBuf> {
    if !model_dir.exists() {
        return None;
    }
    match fs::remove_dir_all(model_dir) {
        Ok(()) => {
            info!("Removed local model directory: {}", model_dir.display());
            Some(model_dir.to_path_buf())
        }
        Err(e) => {
            warn!("Failed to remove {}: {}", model_dir.display(), e);
            None
        }
    }
}
