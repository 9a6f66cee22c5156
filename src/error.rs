//! Error types for wsbuild
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// A single builder failure captured during a build
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Builder '{builder}' failed on '{config}': {message}")]
pub struct BuilderFailure {
    /// Build configuration the builder ran for (`project/config`)
    pub config: String,
    /// Builder identity
    pub builder: String,
    /// Failure message reported by the builder
    pub message: String,
}

/// Errors a builder body reports back to the build manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// The builder ran and failed
    #[error("{0}")]
    Failed(String),

    /// The builder noticed cancellation and stopped
    #[error("Builder canceled")]
    Canceled,
}

/// Build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// The build was canceled explicitly or by an autobuild interruption
    #[error("Build canceled")]
    Canceled,

    /// One or more builders failed
    #[error("{} builder(s) failed: {}", failures.len(), failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multi { failures: Vec<BuilderFailure> },

    /// Dependency resolution failed
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Workspace lookup failed
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// The build task itself crashed
    #[error("Build task failed: {0}")]
    Task(String),
}

impl BuildError {
    /// Whether this error represents a cancellation rather than a failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Dependency resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Missing dependency
    #[error("Missing dependency: '{dependency}' required by '{project}'")]
    MissingDependency { project: String, dependency: String },
}

/// Workspace model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    /// Project not found
    #[error("Project '{name}' not found in workspace")]
    ProjectNotFound { name: String },

    /// Project registered twice
    #[error("Project '{name}' is already defined")]
    DuplicateProject { name: String },

    /// Unknown build configuration
    #[error("Project '{project}' has no build configuration '{config}'")]
    ConfigNotFound { project: String, config: String },
}

/// Manifest errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Manifest not found
    #[error("Manifest not found at '{path}'")]
    NotFound { path: PathBuf },

    /// IO error while reading the manifest
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Manifest parse error
    #[error("Failed to parse manifest: {0}")]
    ParseError(String),

    /// Semantic validation failed
    #[error("Invalid manifest: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },
}

/// Build state persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to read the state file
    #[error("Failed to read build state '{path}': {error}")]
    ReadError { path: PathBuf, error: String },

    /// Failed to write the state file
    #[error("Failed to write build state '{path}': {error}")]
    WriteError { path: PathBuf, error: String },

    /// The state blob could not be decoded
    #[error("Failed to decode build state: {0}")]
    Decode(String),
}
