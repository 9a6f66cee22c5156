//! Workspace session
//!
//! Loads the manifest, global config and saved build state of a workspace and
//! wires them into a [`BuildManager`] backed by the filesystem tree and the
//! shell builder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::core::autobuild::AutoBuildSettings;
use crate::core::global_config::GlobalConfig;
use crate::core::manager::BuildManager;
use crate::core::manifest::Manifest;
use crate::core::project::BuildConfiguration;
use crate::core::snapshot::WorkspaceTree;
use crate::core::workspace::Workspace;
use crate::infra::dirs::WsbuildDirs;
use crate::infra::filesystem::FsTree;
use crate::infra::shell::ShellBuilder;
use crate::infra::state_file;

/// An opened workspace
pub struct Session {
    /// Directory containing the manifest
    pub root: PathBuf,
    /// Parsed manifest
    pub manifest: Manifest,
    /// User-level defaults
    pub global: GlobalConfig,
    /// Filesystem tree backing the workspace
    pub tree: Arc<FsTree>,
    /// Build manager for the workspace
    pub manager: Arc<BuildManager>,
}

impl Session {
    /// Open the workspace whose manifest is in `dir` or one of its ancestors
    ///
    /// `jobs` overrides the manifest and the global config.
    pub fn open(dir: &Path, jobs: Option<usize>) -> Result<Self> {
        let Some(manifest_path) = Manifest::discover(dir) else {
            bail!(
                "No {} found in {} or any parent directory",
                crate::config::defaults::MANIFEST_FILE,
                dir.display()
            );
        };
        let root = manifest_path
            .parent()
            .map_or_else(|| dir.to_path_buf(), Path::to_path_buf);

        let manifest = Manifest::load(&manifest_path)
            .with_context(|| format!("Failed to load {}", manifest_path.display()))?;
        manifest
            .validate()
            .with_context(|| format!("Invalid manifest {}", manifest_path.display()))?;
        let global =
            GlobalConfig::load(&WsbuildDirs::new()).context("Failed to load global config")?;

        let projects = manifest.to_projects();
        let tree = Arc::new(FsTree::new(&root, &projects));
        tree.rescan()
            .with_context(|| format!("Failed to scan workspace {}", root.display()))?;

        let mut description = manifest.description(global.build_jobs());
        if let Some(jobs) = jobs {
            description.jobs = jobs.max(1);
        }
        let workspace = Workspace::new(Arc::clone(&tree) as Arc<dyn WorkspaceTree>)
            .with_root(root.clone())
            .with_description(description);
        for project in projects {
            workspace.add_project(project)?;
        }
        let workspace = Arc::new(workspace);

        let manager = Arc::new(BuildManager::new(Arc::clone(&workspace)));
        manager.register(ShellBuilder::descriptor(workspace));
        if let Some(state) = state_file::load(&root).context("Failed to load build state")? {
            manager.load_state(state);
        }

        tracing::info!("Opened workspace {}", root.display());
        Ok(Self {
            root,
            manifest,
            global,
            tree,
            manager,
        })
    }

    /// Persist the builder state
    pub fn save(&self) -> Result<()> {
        state_file::save(&self.root, &self.manager.save_state())
            .context("Failed to save build state")
    }

    /// Autobuild settings from the global config, overridden by the manifest
    pub fn autobuild_settings(&self) -> AutoBuildSettings {
        self.manifest
            .autobuild_settings(self.global.autobuild_settings())
    }

    /// Configurations selected by project names and an optional config name
    ///
    /// Without projects, the active configuration of every project.
    pub fn select_configs(
        &self,
        projects: &[String],
        config: Option<&str>,
    ) -> Result<Vec<BuildConfiguration>> {
        let workspace = self.manager.workspace();
        if projects.is_empty() {
            if config.is_some() {
                bail!("--config requires --project");
            }
            return Ok(workspace.active_configs()?);
        }
        projects
            .iter()
            .map(|name| {
                let project = workspace.require_project(name)?;
                let selected = match config {
                    Some(config) => BuildConfiguration::new(name, config),
                    None => project.active_config(),
                };
                workspace.validate_config(&selected)?;
                Ok(selected)
            })
            .collect()
    }
}
