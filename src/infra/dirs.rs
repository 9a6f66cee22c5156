//! Platform-specific directory management
//!
//! Resolves the user config directory holding `config.toml`. Follows the XDG
//! Base Directory Specification on Linux and standard locations on macOS.
//! `WSBUILD_CONFIG_DIR` overrides the platform default.

use std::env;
use std::path::{Path, PathBuf};

use crate::config::defaults;

/// Environment variable overriding the config directory
pub const ENV_CONFIG_DIR: &str = "WSBUILD_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "wsbuild";

/// Name of the global config file
const GLOBAL_CONFIG_FILE: &str = "config.toml";

/// Directory provider for wsbuild
#[derive(Debug, Clone)]
pub struct WsbuildDirs {
    config_dir: PathBuf,
}

impl WsbuildDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Use an explicit config directory
    #[must_use]
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// The config directory
    ///
    /// - Linux: `$XDG_CONFIG_HOME/wsbuild` or `~/.config/wsbuild`
    /// - macOS: `~/Library/Application Support/wsbuild`
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of `config.toml` in the config directory
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join(GLOBAL_CONFIG_FILE)
    }

    /// Directory holding a workspace's build state
    #[must_use]
    pub fn state_dir(workspace_root: &Path) -> PathBuf {
        workspace_root.join(defaults::STATE_DIR)
    }

    /// Path of a workspace's persisted build state
    #[must_use]
    pub fn state_path(workspace_root: &Path) -> PathBuf {
        Self::state_dir(workspace_root).join(defaults::STATE_FILE)
    }

    fn resolve_config_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG_DIR) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }
}

impl Default for WsbuildDirs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_not_empty() {
        let dirs = WsbuildDirs::new();
        assert!(!dirs.config_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_global_config_path_is_under_config_dir() {
        let dirs = WsbuildDirs::with_config_dir("/tmp/wsbuild-config");
        assert!(dirs.global_config_path().starts_with(dirs.config_dir()));
        assert!(dirs.global_config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_state_path_is_under_workspace() {
        let root = Path::new("/work");
        let path = WsbuildDirs::state_path(root);
        assert!(path.starts_with(root.join(".wsbuild")));
        assert!(path.ends_with("state.json"));
    }
}
