//! Workspace snapshots and resource deltas
//!
//! A [`Snapshot`] is an immutable view of every resource in the workspace,
//! keyed by path (`project/dir/file`) with a content fingerprint. Snapshots are
//! shared by reference; two handles to the same snapshot compare equal without
//! looking at their contents. Structural comparison is only done on demand.
//!
//! The tree storage itself is a collaborator behind [`WorkspaceTree`]:
//! the build manager only asks for the current snapshot and for diffs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Compute the content fingerprint stored for a resource
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Whether `path` lies inside the subtree rooted at `scope`
pub fn in_scope(path: &str, scope: &str) -> bool {
    path == scope
        || (path.len() > scope.len()
            && path.starts_with(scope)
            && path.as_bytes()[scope.len()] == b'/')
}

struct SnapshotData {
    id: u64,
    entries: BTreeMap<String, String>,
}

/// Immutable snapshot of the workspace resource tree
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotData>,
}

impl Snapshot {
    /// A snapshot without any resources
    pub fn empty() -> Self {
        Self::from_entries(BTreeMap::new())
    }

    /// Create a snapshot from path → fingerprint entries
    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self {
            inner: Arc::new(SnapshotData {
                id: NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed),
                entries,
            }),
        }
    }

    /// Process-unique identity of this snapshot
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Identity comparison
    pub fn is_same(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// All entries
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.inner.entries
    }

    /// Fingerprint of a single resource
    pub fn get(&self, path: &str) -> Option<&str> {
        self.inner.entries.get(path).map(String::as_str)
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the snapshot has no resources
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Whether any resource exists under `scope`
    pub fn includes(&self, scope: &str) -> bool {
        self.scoped(scope).next().is_some()
    }

    fn scoped<'a>(&'a self, scope: &'a str) -> impl Iterator<Item = (&'a String, &'a String)> {
        self.inner
            .entries
            .range(scope.to_string()..)
            .take_while(move |(path, _)| path.starts_with(scope))
            .filter(move |(path, _)| in_scope(path, scope))
    }

    /// Copy of this snapshot with one resource added or replaced
    #[must_use]
    pub fn with_entry(&self, path: &str, fingerprint: &str) -> Self {
        let mut entries = self.inner.entries.clone();
        entries.insert(path.to_string(), fingerprint.to_string());
        Self::from_entries(entries)
    }

    /// Copy of this snapshot with every resource under `path` removed
    #[must_use]
    pub fn without(&self, path: &str) -> Self {
        let entries = self
            .inner
            .entries
            .iter()
            .filter(|(p, _)| !in_scope(p, path))
            .map(|(p, f)| (p.clone(), f.clone()))
            .collect();
        Self::from_entries(entries)
    }

    /// Whether two optional snapshots differ
    ///
    /// Identical handles never differ; otherwise the entries are compared.
    pub fn has_changes(old: Option<&Snapshot>, new: Option<&Snapshot>) -> bool {
        match (old, new) {
            (None, None) => false,
            (Some(old), Some(new)) => {
                !old.is_same(new) && old.inner.entries != new.inner.entries
            }
            _ => true,
        }
    }

    /// Structural diff of the `scope` subtree between `self` (old) and `new`
    ///
    /// Returns `None` when the scope exists in neither snapshot.
    pub fn diff(&self, new: &Snapshot, scope: &str) -> Option<ResourceDelta> {
        if !self.includes(scope) && !new.includes(scope) {
            return None;
        }
        if self.is_same(new) {
            return Some(ResourceDelta::no_change(scope));
        }

        let mut changes = Vec::new();
        for (path, old_print) in self.scoped(scope) {
            match new.get(path) {
                None => changes.push(ResourceChange::new(path, ChangeKind::Removed)),
                Some(new_print) if new_print != old_print => {
                    changes.push(ResourceChange::new(path, ChangeKind::Modified));
                }
                Some(_) => {}
            }
        }
        for (path, _) in new.scoped(scope) {
            if self.get(path).is_none() {
                changes.push(ResourceChange::new(path, ChangeKind::Added));
            }
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));

        Some(ResourceDelta {
            scope: scope.to_string(),
            changes,
        })
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.inner.id)
            .field("resources", &self.inner.entries.len())
            .finish()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::deserialize(deserializer).map(Self::from_entries)
    }
}

/// Kind of change to a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Resource exists only in the new snapshot
    Added,
    /// Resource exists only in the old snapshot
    Removed,
    /// Resource content changed
    Modified,
}

/// A changed resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    /// Resource path
    pub path: String,
    /// Change kind
    pub kind: ChangeKind,
}

impl ResourceChange {
    fn new(path: &str, kind: ChangeKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
        }
    }
}

/// Changes to one project subtree between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    /// Subtree root the delta is scoped to
    pub scope: String,
    /// Changed resources, sorted by path
    pub changes: Vec<ResourceChange>,
}

impl ResourceDelta {
    /// A delta without changes
    pub fn no_change(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            changes: Vec::new(),
        }
    }

    /// Whether the subtree changed at all
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Changes of the given kind
    pub fn affected(&self, kind: ChangeKind) -> impl Iterator<Item = &ResourceChange> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }
}

/// Source of workspace snapshots and diffs
pub trait WorkspaceTree: Send + Sync {
    /// The current snapshot
    fn current(&self) -> Snapshot;

    /// Diff of `scope` between two snapshots, `None` if the scope exists in neither
    fn diff(&self, old: &Snapshot, new: &Snapshot, scope: &str) -> Option<ResourceDelta> {
        old.diff(new, scope)
    }
}

/// In-memory workspace tree
///
/// Every mutation publishes a new snapshot; previously returned snapshots are
/// never modified.
#[derive(Default)]
pub struct MemoryTree {
    current: RwLock<Snapshot>,
    diffs: AtomicUsize,
}

impl MemoryTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a resource with the given content
    pub fn write(&self, path: &str, content: &str) {
        let print = fingerprint(content.as_bytes());
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = current.with_entry(path, &print);
    }

    /// Remove a resource and everything below it
    pub fn remove(&self, path: &str) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = current.without(path);
    }

    /// Replace the whole tree
    pub fn replace(&self, snapshot: Snapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Number of structural diffs computed so far
    pub fn diff_count(&self) -> usize {
        self.diffs.load(Ordering::Relaxed)
    }
}

impl WorkspaceTree for MemoryTree {
    fn current(&self) -> Snapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn diff(&self, old: &Snapshot, new: &Snapshot, scope: &str) -> Option<ResourceDelta> {
        self.diffs.fetch_add(1, Ordering::Relaxed);
        old.diff(new, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(entries: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_entries(
            entries
                .iter()
                .map(|(p, c)| ((*p).to_string(), fingerprint(c.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn test_scope_matching() {
        assert!(in_scope("app", "app"));
        assert!(in_scope("app/src/main.rs", "app"));
        assert!(!in_scope("application/main.rs", "app"));
        assert!(!in_scope("ap", "app"));
    }

    #[test]
    fn test_clone_is_same_snapshot() {
        let snapshot = tree_with(&[("app/a", "1")]);
        let copy = snapshot.clone();
        assert!(snapshot.is_same(&copy));
        assert!(!Snapshot::has_changes(Some(&snapshot), Some(&copy)));
    }

    #[test]
    fn test_structurally_equal_snapshots_have_no_changes() {
        let a = tree_with(&[("app/a", "1")]);
        let b = tree_with(&[("app/a", "1")]);
        assert!(!a.is_same(&b));
        assert!(!Snapshot::has_changes(Some(&a), Some(&b)));
    }

    #[test]
    fn test_missing_snapshot_counts_as_change() {
        let a = tree_with(&[]);
        assert!(Snapshot::has_changes(None, Some(&a)));
        assert!(Snapshot::has_changes(Some(&a), None));
        assert!(!Snapshot::has_changes(None, None));
    }

    #[test]
    fn test_diff_reports_added_removed_modified() {
        let old = tree_with(&[("app/a", "1"), ("app/b", "2"), ("lib/x", "1")]);
        let new = tree_with(&[("app/a", "1"), ("app/b", "3"), ("app/c", "1"), ("lib/x", "9")]);

        let delta = old.diff(&new, "app").unwrap();
        assert_eq!(delta.changes.len(), 2);
        assert_eq!(delta.affected(ChangeKind::Modified).count(), 1);
        assert_eq!(delta.affected(ChangeKind::Added).next().unwrap().path, "app/c");

        let removed = new.diff(&old, "app").unwrap();
        assert_eq!(removed.affected(ChangeKind::Removed).count(), 1);
    }

    #[test]
    fn test_diff_scoped_to_project() {
        let old = tree_with(&[("app/a", "1"), ("lib/x", "1")]);
        let new = tree_with(&[("app/a", "1"), ("lib/x", "2")]);
        let delta = old.diff(&new, "app").unwrap();
        assert!(!delta.has_changes());
    }

    #[test]
    fn test_diff_of_unknown_scope_is_none() {
        let old = tree_with(&[("app/a", "1")]);
        let new = tree_with(&[("app/a", "2")]);
        assert!(old.diff(&new, "missing").is_none());
    }

    #[test]
    fn test_memory_tree_publishes_new_snapshots() {
        let tree = MemoryTree::new();
        tree.write("app/a", "1");
        let first = tree.current();
        tree.write("app/a", "2");
        let second = tree.current();

        assert!(!first.is_same(&second));
        assert_ne!(first.get("app/a"), second.get("app/a"));
        assert_eq!(tree.diff(&first, &second, "app").unwrap().changes.len(), 1);
        assert_eq!(tree.diff_count(), 1);
    }

    #[test]
    fn test_snapshot_serde_keeps_entries() {
        let snapshot = tree_with(&[("app/a", "1")]);
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_same(&snapshot));
        assert!(!Snapshot::has_changes(Some(&restored), Some(&snapshot)));
    }
}
