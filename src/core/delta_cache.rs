//! Per-build-cycle delta memoization
//!
//! Builders of the same project usually share the same last-built snapshot,
//! so the delta of a project between two snapshots is computed once and handed
//! to every builder that asks. Only one `(old, new)` generation is kept.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::core::snapshot::{ResourceDelta, Snapshot, WorkspaceTree};

#[derive(Default)]
struct Generation {
    old: Option<Snapshot>,
    new: Option<Snapshot>,
    /// Whether the two snapshots are structurally equal
    unchanged: Option<bool>,
    deltas: HashMap<String, Option<ResourceDelta>>,
}

impl Generation {
    fn matches(&self, old: &Snapshot, new: &Snapshot) -> bool {
        self.old.as_ref().is_some_and(|o| o.is_same(old))
            && self.new.as_ref().is_some_and(|n| n.is_same(new))
    }
}

/// Memoized project deltas for one `(old, new)` snapshot pair
#[derive(Default)]
pub struct DeltaCache {
    generation: Mutex<Generation>,
}

impl DeltaCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta of `project` between `old` and `new`
    ///
    /// A request for a different snapshot pair drops every cached delta.
    /// Identical or structurally equal snapshots short-circuit to a no-change
    /// delta without asking the tree for a diff.
    pub fn delta(
        &self,
        tree: &dyn WorkspaceTree,
        project: &str,
        old: &Snapshot,
        new: &Snapshot,
    ) -> Option<ResourceDelta> {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !generation.matches(old, new) {
            *generation = Generation {
                old: Some(old.clone()),
                new: Some(new.clone()),
                ..Generation::default()
            };
        }

        if let Some(delta) = generation.deltas.get(project) {
            return delta.clone();
        }

        let unchanged = *generation
            .unchanged
            .get_or_insert_with(|| !Snapshot::has_changes(Some(old), Some(new)));
        let delta = if unchanged {
            (old.includes(project) || new.includes(project))
                .then(|| ResourceDelta::no_change(project))
        } else {
            tracing::debug!("Computing delta of '{project}'");
            tree.diff(old, new, project)
        };

        generation
            .deltas
            .insert(project.to_string(), delta.clone());
        delta
    }

    /// Number of project deltas currently cached
    pub fn len(&self) -> usize {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deltas
            .len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the cached generation
    pub fn flush(&self) {
        *self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Generation::default();
    }
}
