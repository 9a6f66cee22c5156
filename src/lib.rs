//! wsbuild - incremental workspace build orchestrator
//!
//! Builds a workspace of interdependent projects by running each project's
//! ordered builders. Builds are incremental against recorded snapshots, loop
//! until builders stop requesting rebuilds, can run in parallel along the
//! dependency graph, and can be scheduled in the background after changes.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Build model and orchestration
//! - [`infra`] - Infrastructure layer (filesystem, processes, state files)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
