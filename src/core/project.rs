//! Project model
//!
//! Projects own an ordered build spec of builder commands and expose one or
//! more build configurations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::trigger::BuildTrigger;

/// Builder arguments
pub type Args = BTreeMap<String, String>;

/// Name of the configuration every project has when none are declared
pub const DEFAULT_CONFIG: &str = "default";

/// One entry of a project's build spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommand {
    /// Builder identity
    #[serde(rename = "name")]
    pub builder: String,

    /// Arguments passed to every invocation
    #[serde(default)]
    pub args: Args,

    /// Whether the builder keeps separate state per build configuration
    #[serde(default = "default_true")]
    pub per_config: bool,

    /// Triggers this command responds to (all when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<BuildTrigger>>,
}

fn default_true() -> bool {
    true
}

impl BuildCommand {
    /// Create a command for the given builder
    pub fn new(builder: &str) -> Self {
        Self {
            builder: builder.to_string(),
            args: Args::new(),
            per_config: true,
            triggers: None,
        }
    }

    /// Add an argument
    #[must_use]
    pub fn with_arg(mut self, key: &str, value: &str) -> Self {
        self.args.insert(key.to_string(), value.to_string());
        self
    }

    /// Keep a single state for all configurations of the project
    #[must_use]
    pub fn per_project(mut self) -> Self {
        self.per_config = false;
        self
    }

    /// Restrict the triggers this command responds to
    #[must_use]
    pub fn with_triggers(mut self, triggers: &[BuildTrigger]) -> Self {
        self.triggers = Some(triggers.to_vec());
        self
    }

    /// Whether this command runs for the given trigger
    pub fn responds_to(&self, trigger: BuildTrigger) -> bool {
        self.triggers
            .as_ref()
            .map_or(true, |triggers| triggers.contains(&trigger))
    }
}

/// A (project, variant) pair; the unit the build manager schedules
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Owning project
    pub project: String,
    /// Variant name
    pub name: String,
}

impl BuildConfiguration {
    /// Create a build configuration
    pub fn new(project: &str, name: &str) -> Self {
        Self {
            project: project.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.name)
    }
}

/// A workspace project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Project name, also the root of its resource subtree
    pub name: String,
    /// Whether the project is open and can be built
    pub accessible: bool,
    /// Directory on disk, relative to the workspace root (defaults to the name)
    pub path: Option<PathBuf>,
    /// Ordered build spec
    pub build_spec: Vec<BuildCommand>,
    /// Declared configuration names; the first one is active
    pub configs: Vec<String>,
    /// Projects this project depends on
    pub dependencies: Vec<String>,
    /// Capabilities and whether each one is enabled
    pub capabilities: BTreeMap<String, bool>,
}

impl Project {
    /// Create an accessible project with the default configuration
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            accessible: true,
            path: None,
            build_spec: Vec::new(),
            configs: vec![DEFAULT_CONFIG.to_string()],
            dependencies: Vec::new(),
            capabilities: BTreeMap::new(),
        }
    }

    /// Append a command to the build spec
    #[must_use]
    pub fn with_builder(mut self, command: BuildCommand) -> Self {
        self.build_spec.push(command);
        self
    }

    /// Replace the configuration names
    #[must_use]
    pub fn with_configs(mut self, configs: &[&str]) -> Self {
        self.configs = configs.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, project: &str) -> Self {
        self.dependencies.push(project.to_string());
        self
    }

    /// Declare a capability
    #[must_use]
    pub fn with_capability(mut self, capability: &str, enabled: bool) -> Self {
        self.capabilities.insert(capability.to_string(), enabled);
        self
    }

    /// Directory of the project below `root`
    pub fn dir(&self, root: &std::path::Path) -> PathBuf {
        root.join(self.path.clone().unwrap_or_else(|| PathBuf::from(&self.name)))
    }

    /// All build configurations of this project
    pub fn build_configs(&self) -> Vec<BuildConfiguration> {
        if self.configs.is_empty() {
            return vec![BuildConfiguration::new(&self.name, DEFAULT_CONFIG)];
        }
        self.configs
            .iter()
            .map(|c| BuildConfiguration::new(&self.name, c))
            .collect()
    }

    /// The active configuration, used when building the whole workspace
    pub fn active_config(&self) -> BuildConfiguration {
        let name = self.configs.first().map_or(DEFAULT_CONFIG, String::as_str);
        BuildConfiguration::new(&self.name, name)
    }

    /// Whether the project declares a configuration with this name
    pub fn has_config(&self, name: &str) -> bool {
        if self.configs.is_empty() {
            return name == DEFAULT_CONFIG;
        }
        self.configs.iter().any(|c| c == name)
    }

    /// Whether the capability is declared, regardless of its state
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains_key(capability)
    }

    /// Whether the capability is declared and enabled
    pub fn is_capability_enabled(&self, capability: &str) -> bool {
        self.capabilities.get(capability).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_responds_to_all_triggers_by_default() {
        let command = BuildCommand::new("shell");
        for trigger in BuildTrigger::ALL {
            assert!(command.responds_to(trigger));
        }
    }

    #[test]
    fn test_command_trigger_filter() {
        let command = BuildCommand::new("shell").with_triggers(&[BuildTrigger::Full]);
        assert!(command.responds_to(BuildTrigger::Full));
        assert!(!command.responds_to(BuildTrigger::Auto));
        assert!(!command.responds_to(BuildTrigger::Clean));
    }

    #[test]
    fn test_project_active_config_is_first() {
        let project = Project::new("core").with_configs(&["debug", "release"]);
        assert_eq!(project.active_config(), BuildConfiguration::new("core", "debug"));
        assert_eq!(project.build_configs().len(), 2);
        assert!(project.has_config("release"));
        assert!(!project.has_config("default"));
    }

    #[test]
    fn test_project_without_configs_uses_default() {
        let mut project = Project::new("core");
        project.configs.clear();
        assert_eq!(project.active_config().name, DEFAULT_CONFIG);
        assert_eq!(project.build_configs().len(), 1);
    }

    #[test]
    fn test_capabilities() {
        let project = Project::new("app")
            .with_capability("rust", true)
            .with_capability("docs", false);
        assert!(project.is_capability_enabled("rust"));
        assert!(project.has_capability("docs"));
        assert!(!project.is_capability_enabled("docs"));
        assert!(!project.has_capability("java"));
    }

    #[test]
    fn test_config_display() {
        assert_eq!(BuildConfiguration::new("app", "debug").to_string(), "app/debug");
    }
}
