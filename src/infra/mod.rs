//! Infrastructure layer
//!
//! Handles all I/O: scanning project directories, running shell builders,
//! persisting build state and locating user configuration. This module is the
//! only place where side effects occur.

pub mod dirs;
pub mod filesystem;
pub mod shell;
pub mod state_file;
