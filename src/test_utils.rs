//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    use crate::core::project::Project;
    use crate::core::snapshot::Snapshot;

    /// Generate a valid project name (lowercase alphanumeric with hyphens)
    pub fn project_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,12}"
    }

    /// Generate an acyclic set of projects
    ///
    /// Project `i` may only depend on projects `0..i`, so any dependency
    /// picks keep the graph acyclic.
    pub fn project_dag(max_projects: usize) -> impl Strategy<Value = Vec<Project>> {
        prop::collection::btree_set(project_name(), 1..=max_projects.max(1))
            .prop_flat_map(|names| {
                let names: Vec<String> = names.into_iter().collect();
                let count = names.len();
                let edges = prop::collection::vec(prop::collection::vec(any::<usize>(), 0..3), count);
                (Just(names), edges)
            })
            .prop_map(|(names, edges)| {
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let mut project = Project::new(name);
                        if i > 0 {
                            for pick in &edges[i] {
                                let dependency = &names[pick % i];
                                if !project.dependencies.contains(dependency) {
                                    project.dependencies.push(dependency.clone());
                                }
                            }
                        }
                        project
                    })
                    .collect()
            })
    }

    /// Generate snapshot entries under the given projects
    pub fn snapshot_for(projects: Vec<String>) -> impl Strategy<Value = Snapshot> {
        let count = projects.len().max(1);
        prop::collection::btree_map(
            (0..count, "[a-z]{1,6}(\\.[a-z]{1,3})?"),
            "[0-9a-f]{8}",
            0..12,
        )
        .prop_map(move |entries| {
            let entries: BTreeMap<String, String> = entries
                .into_iter()
                .filter_map(|((project, file), print)| {
                    projects
                        .get(project)
                        .map(|name| (format!("{name}/{file}"), print))
                })
                .collect();
            Snapshot::from_entries(entries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::config::defaults;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(defaults::MIN_PROPTEST_ITERATIONS))]

        #[test]
        fn test_project_name_generator(name in project_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_project_dag_only_points_backwards(projects in project_dag(6)) {
            for (i, project) in projects.iter().enumerate() {
                for dependency in &project.dependencies {
                    let position = projects.iter().position(|p| &p.name == dependency);
                    prop_assert!(position.is_some_and(|p| p < i));
                }
            }
        }

        #[test]
        fn test_snapshot_paths_are_scoped(snapshot in snapshot_for(vec!["lib".to_string(), "app".to_string()])) {
            for path in snapshot.entries().keys() {
                prop_assert!(path.starts_with("lib/") || path.starts_with("app/"));
            }
        }
    }
}
