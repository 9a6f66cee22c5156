//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests: temporary
//! workspace directories for CLI tests and an in-memory workspace with
//! scripted builders for build manager tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use wsbuild::core::builder::Builder;
use wsbuild::core::context::BuildContext;
use wsbuild::core::manager::{BuildManager, BuildReport};
use wsbuild::core::project::{Args, Project};
use wsbuild::core::registry::BuilderDescriptor;
use wsbuild::core::snapshot::MemoryTree;
use wsbuild::core::trigger::BuildTrigger;
use wsbuild::core::workspace::{Workspace, WorkspaceDescription};
use wsbuild::error::{BuildError, BuilderError};

/// Test project context
///
/// Creates a temporary directory for test workspaces and provides
/// utilities for setting up test scenarios.
pub struct TestProject {
    /// Temporary directory for the test workspace
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test workspace in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test workspace directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test workspace
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test workspace
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Check if a file exists in the test workspace
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test workspace
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample manifest with two shell-built projects
///
/// `lib` copies `src.txt` to `target/lib.out`; `app` depends on `lib` and
/// appends a line to `target/app.out` on every build. `target/` is not
/// scanned, so outputs do not count as changes.
pub const SAMPLE_MANIFEST: &str = r#"
[workspace]
autobuild = false

[[project]]
name = "lib"
configs = ["debug", "release"]

[[project.builder]]
name = "shell"
args = { command = "mkdir -p target && cat src.txt > target/lib.out", clean = "rm -f target/lib.out" }

[[project]]
name = "app"
depends_on = ["lib"]

[[project.builder]]
name = "shell"
args = { command = "mkdir -p target && echo built >> target/app.out", clean = "rm -f target/app.out", depends = "lib" }
"#;

/// Invocation log shared by scripted builders, entries are `project:builder`
pub type Calls = Arc<Mutex<Vec<String>>>;

/// Behavior of a scripted builder, called after the invocation is recorded
pub type Behavior =
    Arc<dyn Fn(&BuildContext<'_>) -> Result<Vec<String>, BuilderError> + Send + Sync>;

struct Scripted {
    id: String,
    calls: Calls,
    behavior: Behavior,
}

impl Builder for Scripted {
    fn build(
        &mut self,
        _trigger: BuildTrigger,
        _args: &Args,
        context: &BuildContext<'_>,
    ) -> Result<Vec<String>, BuilderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", context.project(), self.id));
        (self.behavior)(context)
    }
}

/// In-memory workspace with a build manager and scripted builders
pub struct Harness {
    pub tree: Arc<MemoryTree>,
    pub manager: Arc<BuildManager>,
    pub calls: Calls,
}

impl Harness {
    /// Create an empty workspace with default settings
    pub fn new() -> Self {
        Self::with_description(WorkspaceDescription::default())
    }

    /// Create an empty workspace with the given settings
    pub fn with_description(description: WorkspaceDescription) -> Self {
        let tree = Arc::new(MemoryTree::new());
        let workspace = Arc::new(Workspace::new(tree.clone()).with_description(description));
        Self {
            tree,
            manager: Arc::new(BuildManager::new(workspace)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register builder `id` running `behavior`
    pub fn register<F>(&self, id: &str, behavior: F)
    where
        F: Fn(&BuildContext<'_>) -> Result<Vec<String>, BuilderError> + Send + Sync + 'static,
    {
        self.register_descriptor(id, Arc::new(behavior), |d| d);
    }

    /// Register builder `id` and adjust its descriptor
    pub fn register_descriptor(
        &self,
        id: &str,
        behavior: Behavior,
        adjust: impl FnOnce(BuilderDescriptor) -> BuilderDescriptor,
    ) {
        let calls = Arc::clone(&self.calls);
        let builder_id = id.to_string();
        let descriptor = BuilderDescriptor::new(id, move |_| {
            Ok(Box::new(Scripted {
                id: builder_id.clone(),
                calls: Arc::clone(&calls),
                behavior: Arc::clone(&behavior),
            }) as Box<dyn Builder>)
        });
        self.manager.register(adjust(descriptor));
    }

    /// Register builder `id` that only records its invocations
    pub fn record(&self, id: &str) {
        self.register(id, |_| Ok(Vec::new()));
    }

    /// Add a project and write one source file for it
    pub fn add(&self, project: Project) {
        self.tree.write(&format!("{}/src", project.name), "0");
        self.manager
            .workspace()
            .add_project(project)
            .expect("Failed to add project");
    }

    /// Build every accessible project
    pub fn build(&self, trigger: BuildTrigger) -> BuildReport {
        self.try_build(trigger).expect("Build failed")
    }

    /// Build every accessible project, returning the error
    pub fn try_build(&self, trigger: BuildTrigger) -> Result<BuildReport, BuildError> {
        self.manager
            .build_workspace(trigger, CancellationToken::new())
    }

    /// Recorded invocations
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget recorded invocations
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Invocations of a report as `project:builder@iteration`
pub fn trace(report: &BuildReport) -> Vec<String> {
    report
        .invocations
        .iter()
        .map(|i| format!("{}:{}@{}", i.config.project, i.builder, i.iteration))
        .collect()
}
