//! Core build orchestration
//!
//! This module contains the build model and the build manager. Apart from
//! manifest and global config loading it performs no I/O; directory scanning
//! and process execution live in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`trigger`] - Build triggers
//! - [`project`] - Projects, build commands and configurations
//! - [`manifest`] - Manifest (wsbuild.toml) parsing and validation
//! - [`global_config`] - User-level defaults
//! - [`snapshot`] - Workspace snapshots, deltas and the tree collaborator
//! - [`rules`] - Scheduling rules and the workspace lock
//! - [`resolver`] - Project dependency graph and build order
//! - [`workspace`] - The workspace model
//! - [`builder`] - Builder trait and builder instances
//! - [`registry`] - Builder registration and instance cache
//! - [`delta_cache`] - Per-build delta memoization
//! - [`context`] - Per-invocation builder context and rebuild requests
//! - [`events`] - Pre/post build notifications
//! - [`persist`] - Persisted builder state
//! - [`manager`] - Sequential build loop and single-builder builds
//! - [`parallel`] - Dependency-ordered parallel builds
//! - [`autobuild`] - Debounced background builds

pub mod autobuild;
pub mod builder;
pub mod context;
pub mod delta_cache;
pub mod events;
pub mod global_config;
pub mod manager;
pub mod manifest;
pub mod parallel;
pub mod persist;
pub mod project;
pub mod registry;
pub mod resolver;
pub mod rules;
pub mod snapshot;
pub mod trigger;
pub mod workspace;
