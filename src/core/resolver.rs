//! Dependency resolution
//!
//! Computes the project build order and the configuration digraph used by
//! the parallel build.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::project::{BuildConfiguration, Project};
use crate::error::ResolverError;

/// Dependency graph for projects
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Adjacency list: project -> dependencies
    edges: BTreeMap<String, Vec<String>>,
    /// All known projects
    nodes: BTreeSet<String>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph of the given projects
    ///
    /// Dependencies on projects outside the set are ignored.
    pub fn from_projects<'a, I>(projects: I) -> Self
    where
        I: IntoIterator<Item = &'a Project>,
    {
        let projects: Vec<&Project> = projects.into_iter().collect();
        let known: BTreeSet<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        let mut graph = Self::new();
        for project in projects {
            let deps = project
                .dependencies
                .iter()
                .filter(|d| known.contains(d.as_str()))
                .cloned()
                .collect();
            graph.add_project(&project.name, deps);
        }
        graph
    }

    /// Add a project to the graph
    pub fn add_project(&mut self, name: &str, dependencies: Vec<String>) {
        self.nodes.insert(name.to_string());
        for dep in &dependencies {
            self.nodes.insert(dep.clone());
        }
        self.edges.insert(name.to_string(), dependencies);
    }

    /// Direct dependencies of a project
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map_or(&[], Vec::as_slice)
    }

    /// Compute topological sort (build order)
    ///
    /// Returns projects in order such that dependencies come before
    /// dependents. Independent projects keep name order.
    pub fn topological_sort(&self) -> Result<Vec<String>, ResolverError> {
        let mut visited = BTreeSet::new();
        let mut temp_visited = BTreeSet::new();
        let mut result = Vec::new();
        let mut cycle_path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node) {
                self.visit(
                    node,
                    &mut visited,
                    &mut temp_visited,
                    &mut result,
                    &mut cycle_path,
                )?;
            }
        }

        Ok(result)
    }

    fn visit(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        temp_visited: &mut BTreeSet<String>,
        result: &mut Vec<String>,
        cycle_path: &mut Vec<String>,
    ) -> Result<(), ResolverError> {
        if temp_visited.contains(node) {
            cycle_path.push(node.to_string());
            return Err(ResolverError::CircularDependency {
                cycle: cycle_path.clone(),
            });
        }

        if visited.contains(node) {
            return Ok(());
        }

        temp_visited.insert(node.to_string());
        cycle_path.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                self.visit(dep, visited, temp_visited, result, cycle_path)?;
            }
        }

        cycle_path.pop();
        temp_visited.remove(node);
        visited.insert(node.to_string());
        result.push(node.to_string());

        Ok(())
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }
}

/// Digraph of build configurations for the parallel build
///
/// An edge `a -> b` means `b` may only start once `a` finished. Only direct
/// project dependencies between the included configurations become edges.
#[derive(Debug, Clone, Default)]
pub struct ConfigGraph {
    vertices: Vec<BuildConfiguration>,
    /// predecessors[i] = indices that must finish before vertex i
    predecessors: Vec<Vec<usize>>,
    /// successors[i] = indices waiting on vertex i
    successors: Vec<Vec<usize>>,
}

impl ConfigGraph {
    /// Build the graph for `configs`, taking edges from the projects' dependencies
    pub fn new<'a, I>(configs: Vec<BuildConfiguration>, projects: I) -> Result<Self, ResolverError>
    where
        I: IntoIterator<Item = &'a Project>,
    {
        let deps: BTreeMap<&str, &[String]> = projects
            .into_iter()
            .map(|p| (p.name.as_str(), p.dependencies.as_slice()))
            .collect();

        let mut predecessors = vec![Vec::new(); configs.len()];
        let mut successors = vec![Vec::new(); configs.len()];
        for (i, config) in configs.iter().enumerate() {
            let Some(project_deps) = deps.get(config.project.as_str()) else {
                continue;
            };
            for (j, other) in configs.iter().enumerate() {
                if i != j && project_deps.contains(&other.project) {
                    predecessors[i].push(j);
                    successors[j].push(i);
                }
            }
        }

        let graph = Self {
            vertices: configs,
            predecessors,
            successors,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), ResolverError> {
        let mut graph = DependencyGraph::new();
        for (i, config) in self.vertices.iter().enumerate() {
            let deps = self.predecessors[i]
                .iter()
                .map(|&j| self.vertices[j].to_string())
                .collect();
            graph.add_project(&config.to_string(), deps);
        }
        graph.topological_sort().map(|_| ())
    }

    /// All vertices
    pub fn vertices(&self) -> &[BuildConfiguration] {
        &self.vertices
    }

    /// Predecessors of vertex `index`
    pub fn predecessors(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    /// Successors of vertex `index`
    pub fn successors(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the graph has no vertices
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::test_utils::generators::project_dag;
    use proptest::prelude::*;

    #[test]
    fn test_simple_dependency_order() {
        let mut graph = DependencyGraph::new();
        graph.add_project("app", vec!["lib".to_string()]);
        graph.add_project("lib", vec![]);

        let order = graph.topological_sort().unwrap();
        let lib_pos = order.iter().position(|x| x == "lib").unwrap();
        let app_pos = order.iter().position(|x| x == "app").unwrap();

        assert!(lib_pos < app_pos, "lib should be built before app");
    }

    #[test]
    fn test_circular_dependency_detection() {
        let mut graph = DependencyGraph::new();
        graph.add_project("a", vec!["b".to_string()]);
        graph.add_project("b", vec!["c".to_string()]);
        graph.add_project("c", vec!["a".to_string()]);

        assert!(graph.has_cycle());
        assert!(graph.topological_sort().is_err());
    }

    #[test]
    fn test_independent_projects_keep_name_order() {
        let projects = [Project::new("c"), Project::new("a"), Project::new("b")];
        let order = DependencyGraph::from_projects(&projects)
            .topological_sort()
            .unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_dependencies_are_ignored() {
        let projects = [Project::new("app").depends_on("ghost")];
        let order = DependencyGraph::from_projects(&projects)
            .topological_sort()
            .unwrap();
        assert_eq!(order, vec!["app"]);
    }

    #[test]
    fn test_config_graph_edges() {
        let projects = [
            Project::new("lib"),
            Project::new("app").depends_on("lib"),
            Project::new("tool"),
        ];
        let configs = projects.iter().map(Project::active_config).collect();
        let graph = ConfigGraph::new(configs, &projects).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.predecessors(1), &[0]);
        assert_eq!(graph.successors(0), &[1]);
        assert!(graph.predecessors(2).is_empty());
    }

    #[test]
    fn test_config_graph_rejects_cycles() {
        let projects = [
            Project::new("a").depends_on("b"),
            Project::new("b").depends_on("a"),
        ];
        let configs = projects.iter().map(Project::active_config).collect();
        assert!(ConfigGraph::new(configs, &projects).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(defaults::MIN_PROPTEST_ITERATIONS))]

        /// Every project comes after all of its dependencies
        #[test]
        fn prop_topological_order_respects_dependencies(projects in project_dag(8)) {
            let order = DependencyGraph::from_projects(&projects)
                .topological_sort()
                .expect("generated graphs are acyclic");
            prop_assert_eq!(order.len(), projects.len());
            for project in &projects {
                let position = order.iter().position(|p| p == &project.name).unwrap();
                for dependency in &project.dependencies {
                    let dep_position = order.iter().position(|p| p == dependency).unwrap();
                    prop_assert!(dep_position < position);
                }
            }
        }
    }
}
