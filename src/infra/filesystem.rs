//! Filesystem-backed workspace tree
//!
//! [`FsTree`] scans every project directory and publishes a [`Snapshot`]
//! whose paths are `project/relative/path`. A rescan that finds nothing new
//! keeps the previous snapshot, so unchanged workspaces compare by identity.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use walkdir::WalkDir;

use crate::config::defaults;
use crate::core::project::Project;
use crate::core::snapshot::{fingerprint, Snapshot, WorkspaceTree};

/// Project name → directory on disk
#[derive(Debug, Clone)]
struct Mapping {
    name: String,
    dir: PathBuf,
}

/// Workspace tree read from disk
pub struct FsTree {
    mappings: RwLock<Vec<Mapping>>,
    current: RwLock<Snapshot>,
}

impl FsTree {
    /// Create a tree for `projects` below `root`; call [`FsTree::rescan`] to
    /// populate it
    pub fn new(root: &Path, projects: &[Project]) -> Self {
        let tree = Self {
            mappings: RwLock::new(Vec::new()),
            current: RwLock::new(Snapshot::empty()),
        };
        tree.set_projects(root, projects);
        tree
    }

    /// Replace the project directory mapping
    pub fn set_projects(&self, root: &Path, projects: &[Project]) {
        let mappings = projects
            .iter()
            .map(|project| Mapping {
                name: project.name.clone(),
                dir: project.dir(root),
            })
            .collect();
        *self.mappings.write().unwrap_or_else(PoisonError::into_inner) = mappings;
    }

    /// Scan the project directories
    ///
    /// Returns whether the published snapshot changed.
    pub fn rescan(&self) -> io::Result<bool> {
        let mappings = self
            .mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut entries = BTreeMap::new();
        for mapping in &mappings {
            scan_project(mapping, &mut entries)?;
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.entries() == &entries {
            return Ok(false);
        }
        tracing::debug!(
            "Workspace tree changed: {} -> {} resource(s)",
            current.len(),
            entries.len()
        );
        *current = Snapshot::from_entries(entries);
        Ok(true)
    }
}

fn is_ignored(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| defaults::IGNORED_DIRS.contains(&name))
}

fn scan_project(mapping: &Mapping, entries: &mut BTreeMap<String, String>) -> io::Result<()> {
    if !mapping.dir.is_dir() {
        tracing::debug!(
            "Project directory {} does not exist, skipping",
            mapping.dir.display()
        );
        return Ok(());
    }

    for entry in WalkDir::new(&mapping.dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&mapping.dir) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read(entry.path())?;
        entries.insert(
            format!("{}/{relative}", mapping.name),
            fingerprint(&content),
        );
    }
    Ok(())
}

impl WorkspaceTree for FsTree {
    fn current(&self) -> Snapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
