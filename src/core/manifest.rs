//! Workspace manifest (wsbuild.toml) parsing and validation
//!
//! The manifest declares the workspace settings and the projects with their
//! build specs. String values may reference environment variables with the
//! `${VAR}` syntax; unset variables expand to the empty string.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::defaults;
use crate::core::autobuild::AutoBuildSettings;
use crate::core::project::{BuildCommand, Project, DEFAULT_CONFIG};
use crate::core::resolver::DependencyGraph;
use crate::core::workspace::WorkspaceDescription;
use crate::error::ManifestError;

/// The workspace manifest (wsbuild.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Workspace-wide build settings
    #[serde(default)]
    pub workspace: WorkspaceSection,

    /// Background build scheduling
    #[serde(default)]
    pub autobuild: AutoBuildSection,

    /// Projects, in declaration order
    #[serde(default, rename = "project", skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectSection>,
}

/// `[workspace]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceSection {
    /// Lower bound for the build loop iteration cap; 0 derives it from the
    /// number of configurations
    #[serde(default)]
    pub max_build_iterations: usize,

    /// Whether `watch` schedules background builds
    #[serde(default = "default_true")]
    pub autobuild: bool,

    /// Stop an iteration once a builder requested a rebuild
    #[serde(default)]
    pub early_exit: bool,

    /// Parallel jobs (defaults to the global config, then the CPU count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            max_build_iterations: defaults::MAX_BUILD_ITERATIONS,
            autobuild: true,
            early_exit: false,
            jobs: None,
        }
    }
}

/// `[autobuild]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoBuildSection {
    /// Shortest delay before a scheduled build starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delay_ms: Option<u64>,

    /// Delay right after a build finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

/// One `[[project]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSection {
    /// Project name
    pub name: String,

    /// Directory relative to the manifest (defaults to the name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Whether the project is open
    #[serde(default = "default_true")]
    pub open: bool,

    /// Projects this one depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Build configuration names; the first is active
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<String>,

    /// Capabilities and whether each is enabled
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, bool>,

    /// Build spec
    #[serde(default, rename = "builder", skip_serializing_if = "Vec::is_empty")]
    pub builders: Vec<BuildCommand>,
}

fn default_true() -> bool {
    true
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("environment variable pattern")
    })
}

/// Substitute `${VAR}` references with environment variable values
///
/// Unset variables expand to the empty string.
///
/// # Examples
/// ```
/// use wsbuild::core::manifest::substitute_env_vars;
///
/// std::env::set_var("WSBUILD_DOC_VAR", "hello");
/// assert_eq!(substitute_env_vars("pre_${WSBUILD_DOC_VAR}_post"), "pre_hello_post");
/// std::env::remove_var("WSBUILD_DOC_VAR");
/// ```
pub fn substitute_env_vars(input: &str) -> String {
    env_var_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Substitute in every string of a TOML value, recursively
fn substitute_in_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = substitute_env_vars(s),
        toml::Value::Array(items) => items.iter_mut().for_each(substitute_in_value),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| substitute_in_value(v)),
        _ => {}
    }
}

impl Manifest {
    /// Load a manifest file, substituting environment variables
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Err(ManifestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::IoError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_with_env(&content)
    }

    /// Find the manifest in `start` or one of its ancestors
    pub fn discover(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(defaults::MANIFEST_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Parse a manifest after `${VAR}` substitution
    pub fn from_toml_with_env(content: &str) -> Result<Self, ManifestError> {
        let mut value: toml::Value =
            toml::from_str(content).map_err(|e| ManifestError::ParseError(e.to_string()))?;
        substitute_in_value(&mut value);
        value
            .try_into()
            .map_err(|e: toml::de::Error| ManifestError::ParseError(e.to_string()))
    }

    /// Parse a manifest verbatim
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check the manifest and report every problem found
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut errors = Vec::new();
        let mut names = BTreeSet::new();

        for project in &self.projects {
            if project.name.trim().is_empty() {
                errors.push("project name cannot be empty".to_string());
                continue;
            }
            if project.name.contains('/') {
                errors.push(format!("project name '{}' cannot contain '/'", project.name));
            }
            if !names.insert(project.name.as_str()) {
                errors.push(format!("project '{}' is defined more than once", project.name));
            }

            let mut configs = BTreeSet::new();
            for config in &project.configs {
                if config.is_empty() {
                    errors.push(format!("project '{}' has an empty config name", project.name));
                } else if !configs.insert(config) {
                    errors.push(format!(
                        "project '{}' declares config '{config}' twice",
                        project.name
                    ));
                }
            }

            for (index, builder) in project.builders.iter().enumerate() {
                if builder.builder.is_empty() {
                    errors.push(format!(
                        "project '{}' builder #{index} has no name",
                        project.name
                    ));
                }
                if builder.triggers.as_ref().is_some_and(Vec::is_empty) {
                    errors.push(format!(
                        "project '{}' builder '{}' responds to no trigger",
                        project.name, builder.builder
                    ));
                }
            }
        }

        for project in &self.projects {
            for dependency in &project.depends_on {
                if !names.contains(dependency.as_str()) {
                    errors.push(format!(
                        "project '{}' depends on unknown project '{dependency}'",
                        project.name
                    ));
                }
            }
        }

        let graph = DependencyGraph::from_projects(self.to_projects().iter());
        if let Err(e) = graph.topological_sort() {
            errors.push(e.to_string());
        }

        if let (Some(min), Some(max)) = (self.autobuild.min_delay_ms, self.autobuild.max_delay_ms)
        {
            if min > max {
                errors.push(format!(
                    "autobuild min_delay_ms ({min}) exceeds max_delay_ms ({max})"
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::Invalid { errors })
        }
    }

    /// Projects described by the manifest
    pub fn to_projects(&self) -> Vec<Project> {
        self.projects
            .iter()
            .map(|section| Project {
                name: section.name.clone(),
                accessible: section.open,
                path: section.path.clone(),
                build_spec: section.builders.clone(),
                configs: if section.configs.is_empty() {
                    vec![DEFAULT_CONFIG.to_string()]
                } else {
                    section.configs.clone()
                },
                dependencies: section.depends_on.clone(),
                capabilities: section.capabilities.clone(),
            })
            .collect()
    }

    /// Workspace description, falling back to `default_jobs`
    pub fn description(&self, default_jobs: usize) -> WorkspaceDescription {
        WorkspaceDescription {
            max_build_iterations: self.workspace.max_build_iterations,
            autobuild: self.workspace.autobuild,
            early_exit: self.workspace.early_exit,
            jobs: self.workspace.jobs.unwrap_or(default_jobs).max(1),
        }
    }

    /// Autobuild settings, with manifest values taking precedence over `base`
    pub fn autobuild_settings(&self, base: AutoBuildSettings) -> AutoBuildSettings {
        AutoBuildSettings {
            enabled: self.workspace.autobuild,
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
