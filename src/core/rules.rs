//! Scheduling rules and the workspace lock
//!
//! The workspace lock is the single coarse token guarding workspace state.
//! It is reentrant for its owning thread and can be released completely while
//! a builder body runs ([`WorkspaceLock::begin_unprotected`]).
//!
//! Scheduling rules are the finer-grained locks builders ask for. A rule names
//! the resource subtree a builder will touch; two rules conflict when their
//! subtrees overlap. [`RuleManager`] hands rules out to threads, blocking while
//! a conflicting rule is held by another thread.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::core::snapshot::in_scope;
use crate::error::BuildError;

/// How long a blocked thread sleeps before re-checking for cancellation
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A lock token over a set of workspace resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchedulingRule {
    /// The whole workspace; conflicts with every rule
    Workspace,
    /// One resource subtree (usually a project)
    Resource(String),
    /// Conjunction of several rules
    Multi(BTreeSet<SchedulingRule>),
}

impl SchedulingRule {
    /// Rule covering one project subtree
    pub fn project(name: &str) -> Self {
        Self::Resource(name.to_string())
    }

    /// Whether two rules may not be held concurrently by different threads
    pub fn conflicts_with(&self, other: &SchedulingRule) -> bool {
        match (self, other) {
            (Self::Workspace, _) | (_, Self::Workspace) => true,
            (Self::Multi(rules), other) => rules.iter().any(|r| r.conflicts_with(other)),
            (this, Self::Multi(rules)) => rules.iter().any(|r| this.conflicts_with(r)),
            (Self::Resource(a), Self::Resource(b)) => in_scope(a, b) || in_scope(b, a),
        }
    }

    /// Whether holding `self` already covers `other`
    pub fn contains(&self, other: &SchedulingRule) -> bool {
        match (self, other) {
            (Self::Workspace, _) => true,
            (_, Self::Workspace) => false,
            (this, Self::Multi(rules)) => rules.iter().all(|r| this.contains(r)),
            (Self::Multi(rules), other) => rules.iter().any(|r| r.contains(other)),
            (Self::Resource(a), Self::Resource(b)) => in_scope(b, a),
        }
    }

    /// Combine the rules of several builders into one
    ///
    /// No rule at all means no locking. When some builders need a rule and
    /// others declare none, the set cannot be partitioned safely and the
    /// workspace rule is used instead.
    pub fn combine<I>(rules: I) -> Option<SchedulingRule>
    where
        I: IntoIterator<Item = Option<SchedulingRule>>,
    {
        let mut collected = BTreeSet::new();
        let mut has_null = false;
        for rule in rules {
            match rule {
                Some(Self::Multi(inner)) => collected.extend(inner),
                Some(rule) => {
                    collected.insert(rule);
                }
                None => has_null = true,
            }
        }

        if collected.is_empty() {
            return None;
        }
        if has_null || collected.contains(&Self::Workspace) {
            return Some(Self::Workspace);
        }
        if collected.len() == 1 {
            return collected.into_iter().next();
        }
        Some(Self::Multi(collected))
    }
}

impl fmt::Display for SchedulingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace => write!(f, "<workspace>"),
            Self::Resource(path) => write!(f, "{path}"),
            Self::Multi(rules) => {
                let names: Vec<String> = rules.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

struct HeldRule {
    owner: ThreadId,
    rule: SchedulingRule,
}

/// Hands out scheduling rules to threads
#[derive(Default)]
pub struct RuleManager {
    held: Mutex<Vec<HeldRule>>,
    released: Condvar,
}

impl RuleManager {
    /// Create a rule manager with no rules held
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_held(&self) -> MutexGuard<'_, Vec<HeldRule>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn blocked_by_other(held: &[HeldRule], rule: &SchedulingRule, me: ThreadId) -> bool {
        held.iter()
            .any(|h| h.owner != me && h.rule.conflicts_with(rule))
    }

    /// Acquire a rule, blocking while another thread holds a conflicting one
    ///
    /// Rules held by the calling thread never block it. The wait aborts with
    /// [`BuildError::Canceled`] once `is_canceled` returns true.
    pub fn begin_rule<F>(
        &self,
        rule: SchedulingRule,
        is_canceled: F,
    ) -> Result<RuleGuard<'_>, BuildError>
    where
        F: Fn() -> bool,
    {
        let me = thread::current().id();
        let mut held = self.lock_held();
        while Self::blocked_by_other(&held, &rule, me) {
            if is_canceled() {
                return Err(BuildError::Canceled);
            }
            held = self
                .released
                .wait_timeout(held, CANCEL_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        tracing::trace!("Acquired scheduling rule {rule}");
        held.push(HeldRule {
            owner: me,
            rule: rule.clone(),
        });
        Ok(RuleGuard {
            manager: self,
            owner: me,
            rule,
        })
    }

    /// Whether `rule` could be acquired right now by the calling thread
    pub fn is_available(&self, rule: &SchedulingRule) -> bool {
        !Self::blocked_by_other(&self.lock_held(), rule, thread::current().id())
    }

    /// Number of rules currently held
    pub fn held_count(&self) -> usize {
        self.lock_held().len()
    }

    fn end_rule(&self, owner: ThreadId, rule: &SchedulingRule) {
        let mut held = self.lock_held();
        if let Some(pos) = held
            .iter()
            .rposition(|h| h.owner == owner && &h.rule == rule)
        {
            held.remove(pos);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Releases a scheduling rule when dropped
pub struct RuleGuard<'a> {
    manager: &'a RuleManager,
    owner: ThreadId,
    rule: SchedulingRule,
}

impl RuleGuard<'_> {
    /// The rule held by this guard
    pub fn rule(&self) -> &SchedulingRule {
        &self.rule
    }
}

impl Drop for RuleGuard<'_> {
    fn drop(&mut self) {
        self.manager.end_rule(self.owner, &self.rule);
    }
}

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant workspace-wide lock
#[derive(Default)]
pub struct WorkspaceLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl WorkspaceLock {
    /// Create an unheld lock
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock, blocking while another thread owns it
    pub fn acquire(&self) -> WorkspaceGuard<'_> {
        self.acquire_depth(1);
        WorkspaceGuard { lock: self }
    }

    fn acquire_depth(&self, depth: usize) {
        if depth == 0 {
            return;
        }
        let me = thread::current().id();
        let mut state = self.lock_state();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = depth;
                    return;
                }
                Some(owner) if owner == me => {
                    state.depth += depth;
                    return;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn release_one(&self) {
        let mut state = self.lock_state();
        if state.owner != Some(thread::current().id()) {
            return;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_all();
        }
    }

    /// Fully release the lock held by the calling thread
    ///
    /// Returns the nesting depth to hand back to [`Self::end_unprotected`];
    /// zero when the calling thread did not hold the lock.
    pub fn begin_unprotected(&self) -> usize {
        let mut state = self.lock_state();
        if state.owner != Some(thread::current().id()) {
            return 0;
        }
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        drop(state);
        self.released.notify_all();
        depth
    }

    /// Re-acquire the lock at the depth returned by [`Self::begin_unprotected`]
    pub fn end_unprotected(&self, depth: usize) {
        self.acquire_depth(depth);
    }

    /// Whether any thread holds the lock
    pub fn is_held(&self) -> bool {
        self.lock_state().owner.is_some()
    }

    /// Whether the calling thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.lock_state().owner == Some(thread::current().id())
    }
}

/// Releases one level of the workspace lock when dropped
pub struct WorkspaceGuard<'a> {
    lock: &'a WorkspaceLock,
}

impl Drop for WorkspaceGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_one();
    }
}
