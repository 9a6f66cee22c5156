//! Build state file
//!
//! Persists the [`BuildState`] blob as JSON under `.wsbuild/state.json` in the
//! workspace root. Writes go through a temporary file and a rename.

use std::path::Path;

use crate::core::persist::BuildState;
use crate::error::StateError;
use crate::infra::dirs::WsbuildDirs;

/// Load the build state of the workspace at `root`
///
/// Returns `None` when no state was saved yet.
pub fn load(root: &Path) -> Result<Option<BuildState>, StateError> {
    let path = WsbuildDirs::state_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| StateError::ReadError {
        path: path.clone(),
        error: e.to_string(),
    })?;
    BuildState::from_json(&content).map(Some)
}

/// Save the build state of the workspace at `root`
pub fn save(root: &Path, state: &BuildState) -> Result<(), StateError> {
    let path = WsbuildDirs::state_path(root);
    let write_error = |e: std::io::Error| StateError::WriteError {
        path: path.clone(),
        error: e.to_string(),
    };

    std::fs::create_dir_all(WsbuildDirs::state_dir(root)).map_err(write_error)?;
    let content = state.to_json()?;
    let temp = path.with_extension("json.tmp");
    std::fs::write(&temp, content).map_err(write_error)?;
    std::fs::rename(&temp, &path).map_err(write_error)?;
    tracing::debug!(
        "Saved state of {} builder(s) to {}",
        state.builders.len(),
        path.display()
    );
    Ok(())
}

/// Remove the saved build state, if any
pub fn remove(root: &Path) -> Result<(), StateError> {
    let path = WsbuildDirs::state_path(root);
    if path.exists() {
        std::fs::remove_file(&path).map_err(|e| StateError::WriteError {
            path,
            error: e.to_string(),
        })?;
    }
    Ok(())
}
