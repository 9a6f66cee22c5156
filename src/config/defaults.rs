//! Default configuration values

use std::time::Duration;

/// Workspace manifest file name
pub const MANIFEST_FILE: &str = "wsbuild.toml";

/// Directory holding build state, relative to the workspace root
pub const STATE_DIR: &str = ".wsbuild";

/// Build state file name inside [`STATE_DIR`]
pub const STATE_FILE: &str = "state.json";

/// Version of the persisted build state layout
pub const STATE_VERSION: u32 = 1;

/// Lower bound for build loop iterations (0 = derive from the config count)
pub const MAX_BUILD_ITERATIONS: usize = 0;

/// Shortest delay before a scheduled autobuild starts
pub const AUTOBUILD_MIN_DELAY: Duration = Duration::from_millis(100);

/// Longest delay before a scheduled autobuild starts
pub const AUTOBUILD_MAX_DELAY: Duration = Duration::from_millis(500);

/// How often `watch` rescans the workspace
pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Directories never included in a workspace scan
pub const IGNORED_DIRS: &[&str] = &[STATE_DIR, ".git", "target"];

/// Builder id of the shell command builder
pub const SHELL_BUILDER: &str = "shell";

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;

/// Default number of parallel build jobs
pub fn default_jobs() -> usize {
    num_cpus::get().max(1)
}
