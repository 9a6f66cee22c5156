//! Build context and rebuild bookkeeping
//!
//! A [`BuildContext`] is created fresh for every builder invocation. It is the
//! builder's only window into the build: deltas, cancellation and the rebuild
//! request hooks. The requests land in the [`RebuildRequests`] of the build
//! call that created the context.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::core::autobuild::AutoBuildFlags;
use crate::core::delta_cache::DeltaCache;
use crate::core::project::BuildConfiguration;
use crate::core::snapshot::{ResourceDelta, Snapshot, WorkspaceTree};
use crate::core::trigger::BuildTrigger;
use crate::error::BuildError;

#[derive(Debug, Default)]
struct RequestState {
    rebuild_all: bool,
    projects: BTreeSet<String>,
    restart: BTreeMap<String, bool>,
    built: BTreeSet<String>,
}

/// Rebuild requests raised by builders during one build call
///
/// Requests accumulate during a build loop iteration and are cleared when the
/// next iteration starts.
#[derive(Debug, Default)]
pub struct RebuildRequests {
    state: Mutex<RequestState>,
}

impl RebuildRequests {
    /// Create empty bookkeeping
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for another iteration over every configuration
    pub fn request_all(&self) {
        self.state().rebuild_all = true;
    }

    /// Ask for `project` to be built again in the next iteration
    pub fn request_project(&self, project: &str) {
        self.state().projects.insert(project.to_string());
    }

    /// Ask for `project` to be built again, optionally aborting its remaining builders
    pub fn request_restart(&self, project: &str, immediately: bool) {
        let mut state = self.state();
        state.projects.insert(project.to_string());
        state
            .restart
            .entry(project.to_string())
            .and_modify(|i| *i |= immediately)
            .or_insert(immediately);
    }

    /// Consume the restart request of `project`; `Some(true)` means restart immediately
    pub fn take_restart(&self, project: &str) -> Option<bool> {
        self.state().restart.remove(project)
    }

    /// Record that `project` was built in the current iteration
    pub fn mark_built(&self, project: &str) {
        self.state().built.insert(project.to_string());
    }

    /// Whether `project` was already built in the current iteration
    pub fn has_been_built(&self, project: &str) -> bool {
        self.state().built.contains(project)
    }

    /// Whether everything should be rebuilt
    pub fn rebuild_all(&self) -> bool {
        self.state().rebuild_all
    }

    /// Projects requested for the next iteration
    pub fn pending_projects(&self) -> BTreeSet<String> {
        self.state().projects.clone()
    }

    /// Whether any rebuild was requested
    pub fn is_pending(&self) -> bool {
        let state = self.state();
        state.rebuild_all || !state.projects.is_empty()
    }

    /// Start a new iteration
    ///
    /// Clears the requests and returns the projects that were explicitly
    /// requested, which the new iteration builds without a delta check.
    pub fn begin_iteration(&self) -> BTreeSet<String> {
        let mut state = self.state();
        if state.rebuild_all {
            state.built.clear();
        } else {
            let requested = state.projects.clone();
            state.built.retain(|p| !requested.contains(p));
        }
        state.rebuild_all = false;
        state.restart.clear();
        std::mem::take(&mut state.projects)
    }

    /// Drop every request and the built set
    pub fn clear(&self) {
        *self.state() = RequestState::default();
    }
}

/// Cancellation checkpoint shared by everything running for one build call
#[derive(Clone)]
pub struct CancelCheck {
    token: CancellationToken,
    flags: Arc<AutoBuildFlags>,
}

impl CancelCheck {
    /// Create a checkpoint from an explicit token and the autobuild flags
    pub fn new(token: CancellationToken, flags: Arc<AutoBuildFlags>) -> Self {
        Self { token, flags }
    }

    /// The explicit cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether a build with `trigger` should stop
    ///
    /// Autobuilds also stop when the autobuild job was interrupted.
    pub fn is_canceled(&self, trigger: BuildTrigger) -> bool {
        self.token.is_cancelled() || (trigger.is_interruptible() && self.flags.is_interrupted())
    }

    /// Fail with [`BuildError::Canceled`] if the build should stop
    pub fn check(&self, trigger: BuildTrigger) -> Result<(), BuildError> {
        if self.is_canceled(trigger) {
            Err(BuildError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Snapshots and collaborators needed to answer delta queries
pub(crate) struct DeltaView<'a> {
    pub tree: &'a dyn WorkspaceTree,
    pub cache: &'a DeltaCache,
    pub old: Snapshot,
    pub new: Snapshot,
    pub interesting: Vec<String>,
}

/// Per-invocation context handed to a builder
pub struct BuildContext<'a> {
    config: BuildConfiguration,
    trigger: BuildTrigger,
    requests: &'a RebuildRequests,
    cancel: &'a CancelCheck,
    deltas: Option<DeltaView<'a>>,
    requested: &'a [BuildConfiguration],
    all: &'a [BuildConfiguration],
    forget: AtomicBool,
    remember: AtomicBool,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        config: BuildConfiguration,
        trigger: BuildTrigger,
        requests: &'a RebuildRequests,
        cancel: &'a CancelCheck,
    ) -> Self {
        Self {
            config,
            trigger,
            requests,
            cancel,
            deltas: None,
            requested: &[],
            all: &[],
            forget: AtomicBool::new(false),
            remember: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_deltas(mut self, deltas: Option<DeltaView<'a>>) -> Self {
        self.deltas = deltas;
        self
    }

    pub(crate) fn with_configs(
        mut self,
        requested: &'a [BuildConfiguration],
        all: &'a [BuildConfiguration],
    ) -> Self {
        self.requested = requested;
        self.all = all;
        self
    }

    /// Configuration being built
    pub fn config(&self) -> &BuildConfiguration {
        &self.config
    }

    /// Project being built
    pub fn project(&self) -> &str {
        &self.config.project
    }

    /// Effective trigger of this invocation
    pub fn trigger(&self) -> BuildTrigger {
        self.trigger
    }

    /// Configurations the caller asked to build
    pub fn requested_configs(&self) -> &[BuildConfiguration] {
        self.requested
    }

    /// Every configuration taking part in this build
    pub fn all_configs(&self) -> &[BuildConfiguration] {
        self.all
    }

    /// Whether the builder should stop as soon as possible
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled(self.trigger)
    }

    /// Delta of `project` since this builder last built
    ///
    /// `None` on full builds, for projects the builder did not declare as
    /// interesting, and for projects that exist in neither snapshot.
    pub fn delta(&self, project: &str) -> Option<ResourceDelta> {
        let view = self.deltas.as_ref()?;
        if project != self.config.project && !view.interesting.iter().any(|p| p == project) {
            return None;
        }
        view.cache.delta(view.tree, project, &view.old, &view.new)
    }

    /// Ask for another build loop iteration over every configuration
    pub fn request_rebuild(&self) {
        tracing::debug!("{} requested a rebuild of everything", self.config);
        self.requests.request_all();
    }

    /// Ask for this project to be built again
    ///
    /// With `process_other_builders == false` the remaining builders of the
    /// project are skipped in this iteration.
    pub fn request_project_rebuild(&self, process_other_builders: bool) {
        tracing::debug!(
            "{} requested a project rebuild (immediate: {})",
            self.config,
            !process_other_builders
        );
        self.requests
            .request_restart(&self.config.project, !process_other_builders);
    }

    /// Ask for projects to be built again
    ///
    /// Only projects already built in this iteration, or the current one, are
    /// recorded; the others are still ahead in the build order.
    pub fn request_rebuild_of<I, S>(&self, projects: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for project in projects {
            let project = project.as_ref();
            if project == self.config.project || self.requests.has_been_built(project) {
                self.requests.request_project(project);
            }
        }
    }

    /// Ask for `project` to be built in the next iteration, unconditionally
    pub fn request_rebuild_on_next_round(&self, project: &str) {
        self.requests.request_project(project);
    }

    /// Whether `project` was already built in this iteration
    pub fn has_been_built(&self, project: &str) -> bool {
        self.requests.has_been_built(project)
    }

    /// Discard the last-built snapshot after this invocation
    pub fn forget_last_built_state(&self) {
        self.forget.store(true, Ordering::SeqCst);
    }

    /// Keep the previous last-built snapshot after this invocation
    pub fn remember_last_built_state(&self) {
        self.remember.store(true, Ordering::SeqCst);
    }

    pub(crate) fn forget_requested(&self) -> bool {
        self.forget.load(Ordering::SeqCst)
    }

    pub(crate) fn remember_requested(&self) -> bool {
        self.remember.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel() -> CancelCheck {
        CancelCheck::new(CancellationToken::new(), Arc::new(AutoBuildFlags::default()))
    }

    #[test]
    fn test_begin_iteration_returns_and_clears_requests() {
        let requests = RebuildRequests::new();
        requests.mark_built("lib");
        requests.mark_built("app");
        requests.request_restart("app", true);

        let forced = requests.begin_iteration();
        assert_eq!(forced.into_iter().collect::<Vec<_>>(), vec!["app"]);
        assert!(!requests.is_pending());
        assert!(requests.take_restart("app").is_none());
        assert!(requests.has_been_built("lib"));
        assert!(!requests.has_been_built("app"));
    }

    #[test]
    fn test_rebuild_all_clears_built_set() {
        let requests = RebuildRequests::new();
        requests.mark_built("lib");
        requests.request_all();
        assert!(requests.is_pending());
        requests.begin_iteration();
        assert!(!requests.has_been_built("lib"));
    }

    #[test]
    fn test_immediate_restart_is_sticky_within_iteration() {
        let requests = RebuildRequests::new();
        requests.request_restart("app", true);
        requests.request_restart("app", false);
        assert_eq!(requests.take_restart("app"), Some(true));
    }

    #[test]
    fn test_request_rebuild_of_ignores_projects_still_ahead() {
        let requests = RebuildRequests::new();
        let cancel = cancel();
        requests.mark_built("lib");
        let context = BuildContext::new(
            BuildConfiguration::new("app", "default"),
            BuildTrigger::Incremental,
            &requests,
            &cancel,
        );

        context.request_rebuild_of(["lib", "tool", "app"]);

        let pending = requests.pending_projects();
        assert!(pending.contains("lib"));
        assert!(pending.contains("app"));
        assert!(!pending.contains("tool"));
    }

    #[test]
    fn test_interruption_only_cancels_autobuilds() {
        let flags = Arc::new(AutoBuildFlags::default());
        let check = CancelCheck::new(CancellationToken::new(), Arc::clone(&flags));
        flags.set_interrupted(true);

        assert!(check.is_canceled(BuildTrigger::Auto));
        assert!(!check.is_canceled(BuildTrigger::Incremental));
        assert!(check.check(BuildTrigger::Full).is_ok());
    }

    #[test]
    fn test_token_cancels_every_trigger() {
        let check = cancel();
        check.token().cancel();
        for trigger in BuildTrigger::ALL {
            assert!(check.check(trigger).unwrap_err().is_canceled());
        }
    }

    #[test]
    fn test_delta_unavailable_without_view() {
        let requests = RebuildRequests::new();
        let cancel = cancel();
        let context = BuildContext::new(
            BuildConfiguration::new("app", "default"),
            BuildTrigger::Full,
            &requests,
            &cancel,
        );
        assert!(context.delta("app").is_none());
    }
}
