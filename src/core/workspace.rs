//! Workspace model
//!
//! The workspace owns the projects, the resource tree collaborator, the
//! workspace lock and the scheduling rule manager. Project descriptions are
//! only changed through the explicit update calls below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::defaults;
use crate::core::project::{BuildCommand, BuildConfiguration, Project};
use crate::core::resolver::{ConfigGraph, DependencyGraph};
use crate::core::rules::{RuleManager, WorkspaceLock};
use crate::core::snapshot::{Snapshot, WorkspaceTree};
use crate::error::{ResolverError, WorkspaceError};

/// Workspace-wide build settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceDescription {
    /// Lower bound for the build loop iteration cap (0 = derive from config count)
    pub max_build_iterations: usize,
    /// Whether mutations schedule background builds
    pub autobuild: bool,
    /// Stop an iteration as soon as a rebuild was requested
    pub early_exit: bool,
    /// Parallelism budget for the parallel build
    pub jobs: usize,
}

impl Default for WorkspaceDescription {
    fn default() -> Self {
        Self {
            max_build_iterations: defaults::MAX_BUILD_ITERATIONS,
            autobuild: true,
            early_exit: false,
            jobs: defaults::default_jobs(),
        }
    }
}

/// A set of projects sharing one resource tree
pub struct Workspace {
    root: PathBuf,
    projects: RwLock<BTreeMap<String, Project>>,
    description: RwLock<WorkspaceDescription>,
    tree: Arc<dyn WorkspaceTree>,
    lock: WorkspaceLock,
    rules: RuleManager,
}

impl Workspace {
    /// Create an empty workspace backed by `tree`
    pub fn new(tree: Arc<dyn WorkspaceTree>) -> Self {
        Self {
            root: PathBuf::from("."),
            projects: RwLock::new(BTreeMap::new()),
            description: RwLock::new(WorkspaceDescription::default()),
            tree,
            lock: WorkspaceLock::new(),
            rules: RuleManager::new(),
        }
    }

    /// Set the directory project paths are relative to
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Replace the workspace description
    #[must_use]
    pub fn with_description(self, description: WorkspaceDescription) -> Self {
        *self.write_description() = description;
        self
    }

    fn read_projects(&self) -> RwLockReadGuard<'_, BTreeMap<String, Project>> {
        self.projects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_projects(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Project>> {
        self.projects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_description(&self) -> RwLockWriteGuard<'_, WorkspaceDescription> {
        self.description
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Workspace root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The resource tree collaborator
    pub fn tree(&self) -> &Arc<dyn WorkspaceTree> {
        &self.tree
    }

    /// The current snapshot of the resource tree
    pub fn snapshot(&self) -> Snapshot {
        self.tree.current()
    }

    /// The workspace-wide lock
    pub fn lock(&self) -> &WorkspaceLock {
        &self.lock
    }

    /// The scheduling rule manager
    pub fn rules(&self) -> &RuleManager {
        &self.rules
    }

    /// Current workspace description
    pub fn description(&self) -> WorkspaceDescription {
        self.description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the workspace description
    pub fn set_description(&self, description: WorkspaceDescription) {
        *self.write_description() = description;
    }

    /// Add a project
    pub fn add_project(&self, project: Project) -> Result<(), WorkspaceError> {
        let mut projects = self.write_projects();
        if projects.contains_key(&project.name) {
            return Err(WorkspaceError::DuplicateProject { name: project.name });
        }
        tracing::debug!("Adding project '{}'", project.name);
        projects.insert(project.name.clone(), project);
        Ok(())
    }

    /// Remove a project, returning its last description
    pub fn remove_project(&self, name: &str) -> Result<Project, WorkspaceError> {
        self.write_projects()
            .remove(name)
            .ok_or_else(|| WorkspaceError::ProjectNotFound {
                name: name.to_string(),
            })
    }

    /// A copy of the project's description
    pub fn project(&self, name: &str) -> Option<Project> {
        self.read_projects().get(name).cloned()
    }

    /// Like [`Self::project`] but failing with [`WorkspaceError::ProjectNotFound`]
    pub fn require_project(&self, name: &str) -> Result<Project, WorkspaceError> {
        self.project(name)
            .ok_or_else(|| WorkspaceError::ProjectNotFound {
                name: name.to_string(),
            })
    }

    /// Copies of all project descriptions, by name
    pub fn projects(&self) -> Vec<Project> {
        self.read_projects().values().cloned().collect()
    }

    /// Whether the project exists and is open
    pub fn is_accessible(&self, name: &str) -> bool {
        self.read_projects().get(name).is_some_and(|p| p.accessible)
    }

    fn update_project<F>(&self, name: &str, update: F) -> Result<(), WorkspaceError>
    where
        F: FnOnce(&mut Project),
    {
        let mut projects = self.write_projects();
        let project = projects
            .get_mut(name)
            .ok_or_else(|| WorkspaceError::ProjectNotFound {
                name: name.to_string(),
            })?;
        update(project);
        Ok(())
    }

    /// Open or close a project
    pub fn set_accessible(&self, name: &str, accessible: bool) -> Result<(), WorkspaceError> {
        self.update_project(name, |p| p.accessible = accessible)
    }

    /// Replace a project's build spec
    ///
    /// Callers holding builder state should go through
    /// `BuildManager::set_build_spec` so live state survives the change.
    pub fn set_build_spec(&self, name: &str, spec: Vec<BuildCommand>) -> Result<(), WorkspaceError> {
        self.update_project(name, |p| p.build_spec = spec)
    }

    /// Enable or disable a capability on a project
    pub fn set_capability(
        &self,
        name: &str,
        capability: &str,
        enabled: bool,
    ) -> Result<(), WorkspaceError> {
        self.update_project(name, |p| {
            p.capabilities.insert(capability.to_string(), enabled);
        })
    }

    /// Strip every command for `builder` from a project's build spec
    ///
    /// Returns whether anything was removed.
    pub fn remove_builders(&self, name: &str, builder: &str) -> Result<bool, WorkspaceError> {
        let mut removed = false;
        self.update_project(name, |p| {
            let before = p.build_spec.len();
            p.build_spec.retain(|c| c.builder != builder);
            removed = p.build_spec.len() != before;
        })?;
        Ok(removed)
    }

    /// Check that a configuration exists
    pub fn validate_config(&self, config: &BuildConfiguration) -> Result<(), WorkspaceError> {
        let project = self.require_project(&config.project)?;
        if project.has_config(&config.name) {
            Ok(())
        } else {
            Err(WorkspaceError::ConfigNotFound {
                project: config.project.clone(),
                config: config.name.clone(),
            })
        }
    }

    /// Accessible project names in dependency order
    pub fn build_order(&self) -> Result<Vec<String>, ResolverError> {
        let projects = self.read_projects();
        DependencyGraph::from_projects(projects.values().filter(|p| p.accessible))
            .topological_sort()
    }

    /// Active configurations of all accessible projects, in build order
    pub fn active_configs(&self) -> Result<Vec<BuildConfiguration>, ResolverError> {
        let order = self.build_order()?;
        let projects = self.read_projects();
        Ok(order
            .iter()
            .filter_map(|name| projects.get(name))
            .map(Project::active_config)
            .collect())
    }

    /// Sort `configs` by the project build order, keeping their relative order per project
    pub fn sort_configs(
        &self,
        configs: &[BuildConfiguration],
    ) -> Result<Vec<BuildConfiguration>, ResolverError> {
        let projects = self.read_projects();
        let order = DependencyGraph::from_projects(projects.values()).topological_sort()?;
        let mut sorted = Vec::with_capacity(configs.len());
        for name in &order {
            sorted.extend(configs.iter().filter(|c| &c.project == name).cloned());
        }
        Ok(sorted)
    }

    /// Dependency digraph over the given configurations
    pub fn config_graph(
        &self,
        configs: Vec<BuildConfiguration>,
    ) -> Result<ConfigGraph, ResolverError> {
        let projects = self.read_projects();
        ConfigGraph::new(configs, projects.values())
    }
}
