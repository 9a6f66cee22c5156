//! Global configuration management
//!
//! Reads user-level defaults from `config.toml` in the config directory:
//! parallel jobs, autobuild delays and output preferences. Workspace manifests
//! and command-line flags take precedence over these values.

use crate::config::defaults;
use crate::core::autobuild::AutoBuildSettings;
use crate::infra::dirs::WsbuildDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read or write the config file
    #[error("Failed to access config file '{path}': {error}")]
    IoError { path: String, error: String },

    /// Failed to parse or serialize the config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },
}

/// Global configuration for wsbuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default build options
    #[serde(default)]
    pub build: BuildConfig,

    /// Autobuild scheduling defaults
    #[serde(default)]
    pub autobuild: AutoBuildConfig,

    /// Output preferences
    #[serde(default)]
    pub output: OutputConfig,
}

/// Default build options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Default number of parallel jobs
    pub jobs: Option<usize>,

    /// Use the parallel build by default
    pub parallel: Option<bool>,
}

/// Autobuild defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBuildConfig {
    /// Shortest delay before a scheduled build, in milliseconds
    pub min_delay_ms: Option<u64>,

    /// Delay right after a build, in milliseconds
    pub max_delay_ms: Option<u64>,
}

/// Output preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Enable quiet mode
    pub quiet: Option<bool>,

    /// Enable JSON output
    pub json: Option<bool>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// A missing file yields the default configuration; an unreadable or
    /// invalid one is an error.
    pub fn load(dirs: &WsbuildDirs) -> Result<Self, GlobalConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::IoError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Save global configuration to the config directory
    pub fn save(&self, dirs: &WsbuildDirs) -> Result<(), GlobalConfigError> {
        self.save_to_path(&dirs.global_config_path())
    }

    /// Save global configuration to a specific path, creating parents
    pub fn save_to_path(&self, path: &Path) -> Result<(), GlobalConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GlobalConfigError::IoError {
                path: parent.display().to_string(),
                error: e.to_string(),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        fs::write(path, content).map_err(|e| GlobalConfigError::IoError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Effective number of build jobs
    #[must_use]
    pub fn build_jobs(&self) -> usize {
        self.build
            .jobs
            .filter(|&jobs| jobs > 0)
            .unwrap_or_else(defaults::default_jobs)
    }

    /// Autobuild settings with the configured delays
    #[must_use]
    pub fn autobuild_settings(&self) -> AutoBuildSettings {
        let base = AutoBuildSettings::default();
        AutoBuildSettings {
            enabled: base.enabled,
            min_delay: self
                .autobuild
                .min_delay_ms
                .map_or(base.min_delay, Duration::from_millis),
            max_delay: self
                .autobuild
                .max_delay_ms
                .map_or(base.max_delay, Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = GlobalConfig::load_from_path(&temp_dir.path().join("config.toml")).unwrap();
        assert_eq!(config, GlobalConfig::default());
        assert_eq!(config.build_jobs(), defaults::default_jobs());
    }

    #[test]
    fn test_load_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[build]\njobs = 3\n\n[autobuild]\nmin_delay_ms = 20\n",
        )
        .unwrap();

        let config = GlobalConfig::load_from_path(&config_path).unwrap();
        assert_eq!(config.build_jobs(), 3);
        let settings = config.autobuild_settings();
        assert_eq!(settings.min_delay, Duration::from_millis(20));
        assert_eq!(settings.max_delay, defaults::AUTOBUILD_MAX_DELAY);
    }

    #[test]
    fn test_zero_jobs_falls_back_to_default() {
        let config = GlobalConfig {
            build: BuildConfig {
                jobs: Some(0),
                parallel: None,
            },
            ..GlobalConfig::default()
        };
        assert_eq!(config.build_jobs(), defaults::default_jobs());
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid toml [[[").unwrap();

        let result = GlobalConfig::load_from_path(&config_path);
        assert!(matches!(result, Err(GlobalConfigError::ParseError { .. })));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let config = GlobalConfig {
            build: BuildConfig {
                jobs: Some(8),
                parallel: Some(true),
            },
            autobuild: AutoBuildConfig {
                min_delay_ms: Some(10),
                max_delay_ms: Some(1000),
            },
            output: OutputConfig {
                quiet: Some(false),
                json: Some(true),
            },
        };

        config.save_to_path(&config_path).unwrap();
        assert_eq!(GlobalConfig::load_from_path(&config_path).unwrap(), config);
    }
}
