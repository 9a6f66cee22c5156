//! Persisted builder state
//!
//! Builder state survives restarts as a list of [`PersistentBuilderInfo`]
//! records. The records are consumed one by one when builders are first
//! instantiated; an entry is never handed out twice.

use serde::{Deserialize, Serialize};

use crate::config::defaults::STATE_VERSION;
use crate::core::snapshot::Snapshot;
use crate::error::StateError;

/// Saved state of one builder instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentBuilderInfo {
    /// Owning project
    pub project: String,
    /// Configuration name; absent for builders keeping one state per project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Builder identity
    pub builder: String,
    /// Position of the command in the build spec when saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Snapshot the builder last built against
    #[serde(default)]
    pub last_built: Option<Snapshot>,
    /// Projects whose changes the builder reacts to
    #[serde(default)]
    pub interesting_projects: Vec<String>,
}

impl PersistentBuilderInfo {
    fn matches(&self, config: Option<&str>, builder: &str) -> bool {
        self.builder == builder && self.config.as_deref() == config
    }
}

/// Remove and return the entry for a builder
///
/// An entry at the same spec index wins; otherwise the first entry with the
/// same builder name and configuration is used.
pub fn take_matching(
    infos: &mut Vec<PersistentBuilderInfo>,
    config: Option<&str>,
    builder: &str,
    index: Option<usize>,
) -> Option<PersistentBuilderInfo> {
    let exact = index.and_then(|index| {
        infos
            .iter()
            .position(|i| i.matches(config, builder) && i.index == Some(index))
    });
    let position = exact.or_else(|| infos.iter().position(|i| i.matches(config, builder)))?;
    Some(infos.remove(position))
}

/// The whole persisted build state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildState {
    /// Layout version
    pub version: u32,
    /// Builder records
    #[serde(default)]
    pub builders: Vec<PersistentBuilderInfo>,
}

impl Default for BuildState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            builders: Vec::new(),
        }
    }
}

impl BuildState {
    /// Create a state from builder records
    pub fn new(builders: Vec<PersistentBuilderInfo>) -> Self {
        Self {
            version: STATE_VERSION,
            builders,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Decode(e.to_string()))
    }

    /// Parse from JSON, rejecting unknown layout versions
    pub fn from_json(content: &str) -> Result<Self, StateError> {
        let state: Self =
            serde_json::from_str(content).map_err(|e| StateError::Decode(e.to_string()))?;
        if state.version != STATE_VERSION {
            return Err(StateError::Decode(format!(
                "unsupported state version {} (expected {STATE_VERSION})",
                state.version
            )));
        }
        Ok(state)
    }
}
