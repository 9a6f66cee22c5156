//! CLI implementation for `wsbuild status`
//!
//! Lists the projects in build order with their configurations and builders,
//! and whether each project changed since its builders last built.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use crate::cli::output::{self, status};
use crate::cli::session::Session;
use crate::core::persist::PersistentBuilderInfo;
use crate::core::snapshot::Snapshot;

/// Build state of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    /// No builder recorded a build
    NeverBuilt,
    /// Files changed since the oldest recorded build
    Changed,
    /// Nothing changed
    UpToDate,
    /// The project is closed
    Closed,
}

impl ProjectState {
    fn as_str(self) -> &'static str {
        match self {
            Self::NeverBuilt => "never built",
            Self::Changed => "changed",
            Self::UpToDate => "up to date",
            Self::Closed => "closed",
        }
    }
}

/// State of `project` given the saved builder records
pub fn project_state(
    project: &str,
    accessible: bool,
    infos: &[PersistentBuilderInfo],
    current: &Snapshot,
) -> ProjectState {
    if !accessible {
        return ProjectState::Closed;
    }
    let built: Vec<&Snapshot> = infos
        .iter()
        .filter(|info| info.project == project)
        .filter_map(|info| info.last_built.as_ref())
        .collect();
    if built.is_empty() {
        return ProjectState::NeverBuilt;
    }
    let changed = built.iter().any(|last| {
        last.diff(current, project)
            .is_some_and(|delta| delta.has_changes())
    });
    if changed {
        ProjectState::Changed
    } else {
        ProjectState::UpToDate
    }
}

/// Execute the status command
pub async fn execute(dir: &Path) -> Result<()> {
    let session = Session::open(dir, None)?;
    let workspace = session.manager.workspace();
    let infos = session.manager.save_state().builders;
    let current = workspace.snapshot();
    let order = workspace.build_order()?;

    let rows: Vec<_> = order
        .iter()
        .filter_map(|name| workspace.project(name))
        .chain(workspace.projects().into_iter().filter(|p| !p.accessible))
        .map(|project| {
            let state = project_state(&project.name, project.accessible, &infos, &current);
            (project, state)
        })
        .collect();

    if output::is_json() {
        let projects: Vec<_> = rows
            .iter()
            .map(|(project, state)| {
                json!({
                    "name": project.name,
                    "state": state.as_str(),
                    "configs": project.configs,
                    "depends_on": project.dependencies,
                    "builders": project.build_spec.iter().map(|c| c.builder.clone()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!(
            "{}",
            json!({ "root": session.root.display().to_string(), "projects": projects })
        );
        return Ok(());
    }

    output::print_status(
        status::INFO,
        &format!("Workspace {}", session.root.display()),
    );
    for (project, state) in &rows {
        let prefix = match state {
            ProjectState::UpToDate => status::SUCCESS,
            ProjectState::Changed | ProjectState::NeverBuilt => status::WARNING,
            ProjectState::Closed => status::INFO,
        };
        let builders: Vec<&str> = project
            .build_spec
            .iter()
            .map(|c| c.builder.as_str())
            .collect();
        output::print_status(
            prefix,
            &format!(
                "{} [{}] {} (builders: {})",
                project.name,
                project.configs.join(", "),
                state.as_str(),
                if builders.is_empty() {
                    "none".to_string()
                } else {
                    builders.join(", ")
                }
            ),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(entries: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_entries(
            entries
                .iter()
                .map(|(p, f)| ((*p).to_string(), (*f).to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn info(project: &str, last_built: Option<Snapshot>) -> PersistentBuilderInfo {
        PersistentBuilderInfo {
            project: project.to_string(),
            config: Some("default".to_string()),
            builder: "shell".to_string(),
            index: Some(0),
            last_built,
            interesting_projects: Vec::new(),
        }
    }

    #[test]
    fn test_project_states() {
        let old = snapshot(&[("lib/a.c", "1"), ("app/main.c", "1")]);
        let current = snapshot(&[("lib/a.c", "2"), ("app/main.c", "1")]);
        let infos = vec![info("lib", Some(old.clone())), info("app", Some(old))];

        assert_eq!(project_state("lib", true, &infos, &current), ProjectState::Changed);
        assert_eq!(project_state("app", true, &infos, &current), ProjectState::UpToDate);
        assert_eq!(project_state("new", true, &infos, &current), ProjectState::NeverBuilt);
        assert_eq!(project_state("lib", false, &infos, &current), ProjectState::Closed);
    }
}
