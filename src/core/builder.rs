//! Builders and builder instances
//!
//! A [`Builder`] is the unit of work the build manager invokes. Everything the
//! manager tracks about a builder (last-built snapshot, interesting projects)
//! lives in the [`BuilderInstance`] wrapper, not in the builder itself.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::context::BuildContext;
use crate::core::project::{Args, BuildConfiguration};
use crate::core::rules::SchedulingRule;
use crate::core::snapshot::Snapshot;
use crate::core::trigger::BuildTrigger;
use crate::error::BuilderError;

/// A builder body
pub trait Builder: Send {
    /// Run an incremental, full or auto build
    ///
    /// Returns the projects, besides its own, whose changes should trigger
    /// this builder next time.
    fn build(
        &mut self,
        trigger: BuildTrigger,
        args: &Args,
        context: &BuildContext<'_>,
    ) -> Result<Vec<String>, BuilderError>;

    /// Discard build outputs
    fn clean(&mut self, _args: &Args, _context: &BuildContext<'_>) -> Result<(), BuilderError> {
        Ok(())
    }

    /// Rule to hold while the builder runs; `None` for no locking
    fn rule(
        &self,
        config: &BuildConfiguration,
        _trigger: BuildTrigger,
        _args: &Args,
    ) -> Option<SchedulingRule> {
        Some(SchedulingRule::project(&config.project))
    }
}

/// Placeholder for a builder that could not be instantiated
///
/// Builds successfully without doing anything; the first build logs a warning.
#[derive(Debug)]
pub struct MissingBuilder {
    id: String,
    reason: String,
    reported: bool,
}

impl MissingBuilder {
    /// Create a placeholder for builder `id`
    pub fn new(id: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.to_string(),
            reported: false,
        }
    }
}

impl Builder for MissingBuilder {
    fn build(
        &mut self,
        _trigger: BuildTrigger,
        _args: &Args,
        context: &BuildContext<'_>,
    ) -> Result<Vec<String>, BuilderError> {
        if !self.reported {
            self.reported = true;
            tracing::warn!(
                "Skipping builder '{}' for {}: {}",
                self.id,
                context.config(),
                self.reason
            );
        }
        Ok(Vec::new())
    }

    fn rule(&self, _: &BuildConfiguration, _: BuildTrigger, _: &Args) -> Option<SchedulingRule> {
        None
    }
}

/// Identity of a builder instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    /// Owning project
    pub project: String,
    /// Configuration, absent for builders with one state per project
    pub config: Option<String>,
    /// Builder identity
    pub builder: String,
    /// Position in the build spec, absent for ad-hoc commands
    pub index: Option<usize>,
}

/// Manager-owned state of a builder instance
#[derive(Debug, Clone, Default)]
pub struct BuilderState {
    /// Snapshot of the last build, `None` before the first one
    pub last_built: Option<Snapshot>,
    /// Projects whose changes trigger this builder
    pub interesting_projects: Vec<String>,
}

/// A builder together with the state the manager keeps for it
pub struct BuilderInstance {
    key: InstanceKey,
    label: String,
    call_on_empty_delta: bool,
    missing: bool,
    body: Mutex<Box<dyn Builder>>,
    state: Mutex<BuilderState>,
}

impl BuilderInstance {
    /// Wrap a builder body
    pub fn new(key: InstanceKey, label: &str, body: Box<dyn Builder>) -> Self {
        Self {
            key,
            label: label.to_string(),
            call_on_empty_delta: false,
            missing: false,
            body: Mutex::new(body),
            state: Mutex::new(BuilderState::default()),
        }
    }

    /// Wrap a [`MissingBuilder`] placeholder
    pub fn missing(key: InstanceKey, reason: &str) -> Self {
        let body = Box::new(MissingBuilder::new(&key.builder, reason));
        let label = key.builder.clone();
        let mut instance = Self::new(key, &label, body);
        instance.missing = true;
        instance
    }

    /// Run even when no delta is available
    #[must_use]
    pub fn with_call_on_empty_delta(mut self, call: bool) -> Self {
        self.call_on_empty_delta = call;
        self
    }

    /// Seed the manager-owned state
    #[must_use]
    pub fn with_state(self, state: BuilderState) -> Self {
        *self.lock_state() = state;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, BuilderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_body(&self) -> MutexGuard<'_, Box<dyn Builder>> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Instance identity
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Builder identity
    pub fn name(&self) -> &str {
        &self.key.builder
    }

    /// Human-readable name
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this is a placeholder for a builder that failed to instantiate
    pub fn is_missing(&self) -> bool {
        self.missing
    }

    /// Whether the builder runs on incremental builds without changes
    pub fn call_on_empty_delta(&self) -> bool {
        self.call_on_empty_delta
    }

    /// Copy of the manager-owned state
    pub fn state(&self) -> BuilderState {
        self.lock_state().clone()
    }

    /// Snapshot of the last build
    pub fn last_built(&self) -> Option<Snapshot> {
        self.lock_state().last_built.clone()
    }

    /// Replace the last-built snapshot
    pub fn set_last_built(&self, snapshot: Option<Snapshot>) {
        self.lock_state().last_built = snapshot;
    }

    /// Projects whose changes trigger this builder
    pub fn interesting_projects(&self) -> Vec<String> {
        self.lock_state().interesting_projects.clone()
    }

    /// Replace the interesting projects
    pub fn set_interesting_projects(&self, projects: Vec<String>) {
        self.lock_state().interesting_projects = projects;
    }

    /// Rule the builder asks for
    pub fn rule(
        &self,
        config: &BuildConfiguration,
        trigger: BuildTrigger,
        args: &Args,
    ) -> Option<SchedulingRule> {
        self.lock_body().rule(config, trigger, args)
    }

    /// Invoke the builder body
    ///
    /// Clean builds call [`Builder::clean`] and report no interesting
    /// projects.
    pub fn invoke(
        &self,
        trigger: BuildTrigger,
        args: &Args,
        context: &BuildContext<'_>,
    ) -> Result<Option<Vec<String>>, BuilderError> {
        let mut body = self.lock_body();
        if trigger == BuildTrigger::Clean {
            body.clean(args, context).map(|()| None)
        } else {
            body.build(trigger, args, context).map(Some)
        }
    }
}

impl std::fmt::Debug for BuilderInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderInstance")
            .field("key", &self.key)
            .field("missing", &self.missing)
            .finish_non_exhaustive()
    }
}
