//! Build manager
//!
//! Runs the build specs of a set of build configurations. The sequential path
//! loops over the configurations in dependency order until no builder asks
//! for another round or the iteration cap is reached:
//!
//! 1. every configuration (first iteration, or after `request_rebuild`) or
//!    only the projects that asked to be rebuilt are built
//! 2. within a project, builders run in build-spec order; each one is only
//!    invoked when its trigger ignores deltas or something it watches changed
//! 3. the workspace lock is released while a builder body runs and the
//!    builder's scheduling rule is held instead
//!
//! The parallel path lives in [`crate::core::parallel`].

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;

use crate::core::autobuild::{AutoBuildFlags, AutoBuildJob};
use crate::core::builder::{BuilderInstance, InstanceKey};
use crate::core::context::{BuildContext, CancelCheck, DeltaView, RebuildRequests};
use crate::core::delta_cache::DeltaCache;
use crate::core::events::{BuildListener, BuildNotifier, EventBracket};
use crate::core::persist::BuildState;
use crate::core::project::{Args, BuildCommand, BuildConfiguration, Project};
use crate::core::registry::{BuilderDescriptor, BuilderRegistry, Resolution};
use crate::core::rules::{RuleGuard, SchedulingRule};
use crate::core::snapshot::Snapshot;
use crate::core::trigger::BuildTrigger;
use crate::core::workspace::Workspace;
use crate::error::{BuildError, BuilderError, BuilderFailure, WorkspaceError};

/// One builder invocation, as recorded in a [`BuildReport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Configuration built
    pub config: BuildConfiguration,
    /// Builder identity
    pub builder: String,
    /// Effective trigger, after promotion
    pub trigger: BuildTrigger,
    /// Build loop iteration, starting at 0
    pub iteration: usize,
}

/// Result of a build call that was not canceled
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Builders that failed; the build carried on with their siblings
    pub failures: Vec<BuilderFailure>,
    /// Non-fatal problems
    pub warnings: Vec<String>,
    /// Every builder invocation, in order of start
    pub invocations: Vec<Invocation>,
    /// Number of build loop iterations run
    pub iterations: usize,
    /// Whether the loop stopped at the iteration cap with requests pending
    pub capped: bool,
    /// Configurations never built because a dependency could not be built
    pub skipped: Vec<BuildConfiguration>,
}

impl BuildReport {
    /// Whether no builder failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of invocations of `builder`
    pub fn invocations_of(&self, builder: &str) -> usize {
        self.invocations
            .iter()
            .filter(|i| i.builder == builder)
            .count()
    }

    /// Turn builder failures into [`BuildError::Multi`]
    pub fn into_result(self) -> Result<Self, BuildError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(BuildError::Multi {
                failures: self.failures,
            })
        }
    }
}

/// State of one build call
pub(crate) struct BuildCycle {
    pub requests: RebuildRequests,
    pub cancel: CancelCheck,
    pub requested: Vec<BuildConfiguration>,
    pub all: Vec<BuildConfiguration>,
    report: Mutex<BuildReport>,
    /// Builders without per-config state already run this iteration
    per_project_done: Mutex<BTreeSet<InstanceKey>>,
    /// Running builders that want to run on empty deltas
    empty_delta_builders: AtomicUsize,
}

impl BuildCycle {
    pub fn new(
        requested: Vec<BuildConfiguration>,
        all: Vec<BuildConfiguration>,
        cancel: CancelCheck,
    ) -> Self {
        Self {
            requests: RebuildRequests::new(),
            cancel,
            requested,
            all,
            report: Mutex::new(BuildReport::default()),
            per_project_done: Mutex::new(BTreeSet::new()),
            empty_delta_builders: AtomicUsize::new(0),
        }
    }

    pub fn report(&self) -> MutexGuard<'_, BuildReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_report(self) -> BuildReport {
        self.report
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn warn(&self, message: String) {
        self.report().warnings.push(message);
    }

    fn begin_iteration(&self) {
        self.per_project_done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Returns false when the per-project builder already ran this iteration
    fn claim_per_project(&self, key: &InstanceKey) -> bool {
        self.per_project_done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone())
    }
}

/// Decrements the running empty-delta builder count when dropped
struct EmptyDeltaGuard<'a>(Option<&'a AtomicUsize>);

impl Drop for EmptyDeltaGuard<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.0 {
            count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

enum Outcome {
    Built(Option<Vec<String>>),
    Failed(String),
    Canceled,
}

struct Invoked<'a> {
    outcome: Outcome,
    forget: bool,
    remember: bool,
    rule_guard: Option<RuleGuard<'a>>,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "builder panicked".to_string()
    }
}

/// Orchestrates builders over a workspace
pub struct BuildManager {
    workspace: Arc<Workspace>,
    registry: BuilderRegistry,
    delta_cache: DeltaCache,
    notifier: BuildNotifier,
    flags: Arc<AutoBuildFlags>,
    autobuild: Mutex<Weak<AutoBuildJob>>,
}

impl BuildManager {
    /// Create a manager for `workspace` with no builder types registered
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            registry: BuilderRegistry::new(),
            delta_cache: DeltaCache::new(),
            notifier: BuildNotifier::new(),
            flags: Arc::new(AutoBuildFlags::default()),
            autobuild: Mutex::new(Weak::new()),
        }
    }

    /// The managed workspace
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// The builder registry
    pub fn registry(&self) -> &BuilderRegistry {
        &self.registry
    }

    /// Flags shared with the autobuild job
    pub fn flags(&self) -> &Arc<AutoBuildFlags> {
        &self.flags
    }

    /// Connect the autobuild job that workspace operations interrupt
    pub(crate) fn attach_autobuild(&self, job: Weak<AutoBuildJob>) {
        *self.autobuild.lock().unwrap_or_else(PoisonError::into_inner) = job;
    }

    fn autobuild(&self) -> Option<Arc<AutoBuildJob>> {
        self.autobuild
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Get a scheduled or running autobuild out of the way
    ///
    /// Called at the start of every workspace operation that conflicts with
    /// the autobuild: explicit builds, build spec changes and project removal.
    pub fn interrupt(&self) {
        if let Some(job) = self.autobuild() {
            job.interrupt();
        }
    }

    /// Let the autobuild pick up after a workspace operation
    fn resume_autobuild(&self, changed: bool) {
        if let Some(job) = self.autobuild() {
            job.resume(changed);
        }
    }

    /// Register a builder type
    pub fn register(&self, descriptor: BuilderDescriptor) {
        self.registry.register(descriptor);
    }

    /// Register a build event listener
    pub fn subscribe(&self, listener: Arc<dyn BuildListener>) {
        self.notifier.subscribe(listener);
    }

    /// Fire the build event pair without building
    pub fn notify_no_build(&self, trigger: BuildTrigger) {
        let _events = self.events(trigger);
    }

    pub(crate) fn events(&self, trigger: BuildTrigger) -> EventBracket<'_> {
        self.notifier.bracket(trigger)
    }

    fn cancel_check(&self, cancel: CancellationToken) -> CancelCheck {
        CancelCheck::new(cancel, Arc::clone(&self.flags))
    }

    /// Build the active configuration of every accessible project
    pub fn build_workspace(
        &self,
        trigger: BuildTrigger,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        let configs = self.workspace.active_configs()?;
        self.build(&configs, trigger, cancel)
    }

    /// Build `configs` sequentially, looping until no rebuild is requested
    ///
    /// Builder failures do not abort the build; they are collected in the
    /// report. Cancellation aborts the build with [`BuildError::Canceled`].
    pub fn build(
        &self,
        configs: &[BuildConfiguration],
        trigger: BuildTrigger,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        self.begin_operation(trigger);
        let result = self.build_sequential(configs, trigger, cancel);
        self.end_operation(trigger);
        result
    }

    fn build_sequential(
        &self,
        configs: &[BuildConfiguration],
        trigger: BuildTrigger,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        for config in configs {
            self.workspace.validate_config(config)?;
        }
        let configs = self.workspace.sort_configs(configs)?;
        let cycle = BuildCycle::new(configs.clone(), configs.clone(), self.cancel_check(cancel));

        tracing::info!("Starting {trigger} build of {} configuration(s)", configs.len());
        let result = self.with_build_rule(&cycle, &configs, trigger, |cycle| {
            self.build_loop(cycle, &configs, trigger)
        });
        self.end_build(trigger, &cycle);

        result?;
        let report = cycle.into_report();
        tracing::info!(
            "Finished {trigger} build: {} invocation(s), {} failure(s), {} iteration(s)",
            report.invocations.len(),
            report.failures.len(),
            report.iterations
        );
        Ok(report)
    }

    /// Run `body` holding the combined rule of `configs` and the workspace lock
    fn with_build_rule<F>(
        &self,
        cycle: &BuildCycle,
        configs: &[BuildConfiguration],
        trigger: BuildTrigger,
        body: F,
    ) -> Result<(), BuildError>
    where
        F: FnOnce(&BuildCycle) -> Result<(), BuildError>,
    {
        let _events = self.notifier.bracket(trigger);
        let rule = SchedulingRule::combine(
            configs
                .iter()
                .map(|c| self.rule_for(c, trigger, None, &Args::new())),
        );
        let _rule = self.begin_rule(cycle, rule, trigger)?;
        let _lock = self.workspace.lock().acquire();
        body(cycle)
    }

    /// Wait for `rule`, giving up when the build is canceled or interrupted
    pub(crate) fn begin_rule(
        &self,
        cycle: &BuildCycle,
        rule: Option<SchedulingRule>,
        trigger: BuildTrigger,
    ) -> Result<Option<RuleGuard<'_>>, BuildError> {
        rule.map(|rule| {
            self.workspace
                .rules()
                .begin_rule(rule, || cycle.cancel.is_canceled(trigger))
        })
        .transpose()
    }

    fn build_loop(
        &self,
        cycle: &BuildCycle,
        configs: &[BuildConfiguration],
        trigger: BuildTrigger,
    ) -> Result<(), BuildError> {
        let description = self.workspace.description();
        let max_iterations = (configs.len() * 2)
            .max(description.max_build_iterations)
            .max(1);

        let mut trigger = trigger;
        cycle.requests.request_all();
        for iteration in 0..max_iterations {
            let rebuild_all = cycle.requests.rebuild_all();
            let targets = if rebuild_all {
                configs.to_vec()
            } else {
                self.rebuild_targets(configs, &cycle.requests.pending_projects())?
            };
            let forced = cycle.requests.begin_iteration();
            cycle.begin_iteration();
            let last_iteration = iteration + 1 == max_iterations;

            tracing::debug!(
                "Build iteration {iteration}: {} configuration(s), trigger {trigger}",
                targets.len()
            );
            for config in &targets {
                if !self.workspace.is_accessible(&config.project) {
                    continue;
                }
                cycle.cancel.check(trigger)?;
                let force = forced.contains(&config.project);
                self.build_config(cycle, config, trigger, force, iteration)?;
                cycle.requests.mark_built(&config.project);

                if description.early_exit && cycle.requests.is_pending() && !last_iteration {
                    tracing::debug!("Rebuild requested, restarting the build loop early");
                    break;
                }
            }

            cycle.report().iterations = iteration + 1;
            if !cycle.requests.is_pending() {
                return Ok(());
            }
            trigger = trigger.for_next_iteration();
        }

        tracing::warn!(
            "Build loop stopped after {max_iterations} iteration(s) with rebuild requests pending"
        );
        cycle.report().capped = true;
        cycle.warn(format!(
            "rebuild requests still pending after {max_iterations} iteration(s)"
        ));
        cycle.requests.clear();
        Ok(())
    }

    /// Configurations to build for the projects that requested a rebuild
    fn rebuild_targets(
        &self,
        configs: &[BuildConfiguration],
        projects: &BTreeSet<String>,
    ) -> Result<Vec<BuildConfiguration>, BuildError> {
        let mut targets: Vec<BuildConfiguration> = configs
            .iter()
            .filter(|c| projects.contains(&c.project))
            .cloned()
            .collect();
        for project in projects {
            if !targets.iter().any(|c| &c.project == project) {
                if let Some(p) = self.workspace.project(project) {
                    targets.push(p.active_config());
                }
            }
        }
        Ok(self.workspace.sort_configs(&targets)?)
    }

    /// Run the build spec of one configuration
    pub(crate) fn build_config(
        &self,
        cycle: &BuildCycle,
        config: &BuildConfiguration,
        trigger: BuildTrigger,
        force: bool,
        iteration: usize,
    ) -> Result<(), BuildError> {
        let Some(project) = self.workspace.project(&config.project) else {
            return Ok(());
        };
        if !project.accessible {
            return Ok(());
        }

        for (index, command) in project.build_spec.iter().enumerate() {
            cycle.cancel.check(trigger)?;
            let instance = match self.resolve(&project, config, command, Some(index))? {
                Some(instance) => instance,
                None => continue,
            };
            self.run_builder(cycle, config, command, &instance, trigger, force, iteration)?;

            if cycle.requests.take_restart(&project.name) == Some(true) {
                tracing::debug!(
                    "'{}' asked to restart {} immediately, skipping its remaining builders",
                    command.builder,
                    config
                );
                break;
            }
        }
        Ok(())
    }

    fn resolve(
        &self,
        project: &Project,
        config: &BuildConfiguration,
        command: &BuildCommand,
        index: Option<usize>,
    ) -> Result<Option<Arc<BuilderInstance>>, WorkspaceError> {
        match self.registry.resolve(project, config, command, index) {
            Resolution::Ready(instance) => Ok(Some(instance)),
            Resolution::Skip => Ok(None),
            Resolution::Remove => {
                self.workspace.remove_builders(&project.name, &command.builder)?;
                Ok(None)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_builder(
        &self,
        cycle: &BuildCycle,
        config: &BuildConfiguration,
        command: &BuildCommand,
        instance: &BuilderInstance,
        trigger: BuildTrigger,
        force: bool,
        iteration: usize,
    ) -> Result<(), BuildError> {
        let clean = trigger == BuildTrigger::Clean;
        let last_built = instance.last_built();
        let mut trigger = trigger;
        let mut responds = command.responds_to(trigger);

        if !clean && last_built.is_none() {
            if trigger == BuildTrigger::Auto && !responds {
                return Ok(());
            }
            trigger = BuildTrigger::Full;
            responds = responds || command.responds_to(trigger);
        }

        if !responds {
            if clean {
                instance.set_last_built(None);
            }
            return Ok(());
        }

        if !command.per_config && !cycle.claim_per_project(instance.key()) {
            tracing::debug!(
                "'{}' keeps one state per project and already ran for '{}'",
                command.builder,
                config.project
            );
            return Ok(());
        }

        if !force && !self.needs_build(cycle, instance, trigger, last_built.as_ref()) {
            tracing::debug!("'{}' on {config} is up to date", command.builder);
            return Ok(());
        }

        let rule = instance.rule(config, trigger, &command.args);
        cycle.report().invocations.push(Invocation {
            config: config.clone(),
            builder: command.builder.clone(),
            trigger,
            iteration,
        });

        let lock = self.workspace.lock();
        let depth = lock.begin_unprotected();
        let invoked = self.invoke_unprotected(
            cycle,
            config,
            command,
            instance,
            trigger,
            rule,
            last_built,
        );
        lock.end_unprotected(depth);
        let invoked = invoked?;

        let canceled = matches!(invoked.outcome, Outcome::Canceled);
        if clean || invoked.forget || canceled {
            instance.set_last_built(None);
        } else if invoked.remember {
            if trigger == BuildTrigger::Full {
                instance.set_last_built(None);
            }
        } else {
            instance.set_last_built(Some(self.workspace.snapshot()));
        }
        drop(invoked.rule_guard);

        match invoked.outcome {
            Outcome::Built(interesting) => {
                if let Some(projects) = interesting {
                    instance.set_interesting_projects(projects);
                }
                Ok(())
            }
            Outcome::Canceled => {
                tracing::info!("'{}' on {config} was canceled", command.builder);
                Err(BuildError::Canceled)
            }
            Outcome::Failed(message) => {
                tracing::error!("Builder '{}' failed on {config}: {message}", command.builder);
                cycle.report().failures.push(BuilderFailure {
                    config: config.to_string(),
                    builder: command.builder.clone(),
                    message,
                });
                Ok(())
            }
        }
    }

    /// Acquire the builder's rule and run its body; the workspace lock is not held
    #[allow(clippy::too_many_arguments)]
    fn invoke_unprotected(
        &self,
        cycle: &BuildCycle,
        config: &BuildConfiguration,
        command: &BuildCommand,
        instance: &BuilderInstance,
        trigger: BuildTrigger,
        rule: Option<SchedulingRule>,
        last_built: Option<Snapshot>,
    ) -> Result<Invoked<'_>, BuildError> {
        let rule = self.begin_rule(cycle, rule, trigger)?;

        let deltas = match (trigger.ignores_delta(), last_built) {
            (false, Some(old)) => Some(DeltaView {
                tree: self.workspace.tree().as_ref(),
                cache: &self.delta_cache,
                old,
                new: self.workspace.snapshot(),
                interesting: instance.interesting_projects(),
            }),
            _ => None,
        };
        let context = BuildContext::new(config.clone(), trigger, &cycle.requests, &cycle.cancel)
            .with_deltas(deltas)
            .with_configs(&cycle.requested, &cycle.all);

        let _empty_delta = if instance.call_on_empty_delta() {
            cycle.empty_delta_builders.fetch_add(1, Ordering::SeqCst);
            EmptyDeltaGuard(Some(&cycle.empty_delta_builders))
        } else {
            EmptyDeltaGuard(None)
        };

        tracing::info!("Invoking '{}' on {config} ({trigger})", instance.label());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            instance.invoke(trigger, &command.args, &context)
        }));
        let outcome = match result {
            Ok(Ok(interesting)) => Outcome::Built(interesting),
            Ok(Err(BuilderError::Failed(message))) => Outcome::Failed(message),
            Ok(Err(BuilderError::Canceled)) => Outcome::Canceled,
            Err(payload) => Outcome::Failed(panic_message(payload.as_ref())),
        };

        Ok(Invoked {
            outcome,
            forget: context.forget_requested(),
            remember: context.remember_requested(),
            rule_guard: rule,
        })
    }

    /// Whether the builder has anything to do
    fn needs_build(
        &self,
        cycle: &BuildCycle,
        instance: &BuilderInstance,
        trigger: BuildTrigger,
        last_built: Option<&Snapshot>,
    ) -> bool {
        match trigger {
            BuildTrigger::Clean | BuildTrigger::Full => return true,
            BuildTrigger::Incremental => {
                if instance.call_on_empty_delta()
                    || cycle.empty_delta_builders.load(Ordering::SeqCst) > 0
                {
                    return true;
                }
            }
            BuildTrigger::Auto => {}
        }

        let Some(old) = last_built else {
            return true;
        };
        let new = self.workspace.snapshot();
        let tree = self.workspace.tree().as_ref();
        let project = &instance.key().project;

        let has_delta = |scope: &str| {
            let changed = self
                .delta_cache
                .delta(tree, scope, old, &new)
                .is_some_and(|d| d.has_changes());
            if changed {
                tracing::debug!(
                    "'{}' on '{project}' needs building because of changes in '{scope}'",
                    instance.name()
                );
            }
            changed
        };

        has_delta(project.as_str())
            || instance
                .interesting_projects()
                .iter()
                .filter(|p| *p != project)
                .any(|p| has_delta(p.as_str()))
    }

    /// Run a single builder, or the whole spec of one configuration
    ///
    /// `builder` names a command of the project's build spec; a name not in
    /// the build spec is run as an ad-hoc command. `args` replace the command's
    /// arguments when not empty. The build loop does not iterate.
    pub fn build_builder(
        &self,
        config: &BuildConfiguration,
        trigger: BuildTrigger,
        builder: Option<&str>,
        args: &Args,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        self.begin_operation(trigger);
        let result = self.build_single(config, trigger, builder, args, cancel);
        self.end_operation(trigger);
        result
    }

    fn build_single(
        &self,
        config: &BuildConfiguration,
        trigger: BuildTrigger,
        builder: Option<&str>,
        args: &Args,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        self.workspace.validate_config(config)?;
        let configs = vec![config.clone()];
        let cycle = BuildCycle::new(configs.clone(), configs, self.cancel_check(cancel));

        let result = match builder {
            None => self.with_build_rule(&cycle, std::slice::from_ref(config), trigger, |cycle| {
                self.build_config(cycle, config, trigger, false, 0)
            }),
            Some(name) => self.run_single(&cycle, config, trigger, name, args),
        };
        self.end_build(trigger, &cycle);

        result?;
        Ok(cycle.into_report())
    }

    fn run_single(
        &self,
        cycle: &BuildCycle,
        config: &BuildConfiguration,
        trigger: BuildTrigger,
        name: &str,
        args: &Args,
    ) -> Result<(), BuildError> {
        let project = self.workspace.require_project(&config.project)?;
        let (index, command) = Self::command_for(&project, name, args);

        let _events = self.notifier.bracket(trigger);
        let rule = self.rule_for(config, trigger, Some(name), args);
        let _rule = self.begin_rule(cycle, rule, trigger)?;
        let _lock = self.workspace.lock().acquire();

        if let Some(instance) = self.resolve(&project, config, &command, index)? {
            self.run_builder(cycle, config, &command, &instance, trigger, false, 0)?;
        }
        Ok(())
    }

    /// The build spec command named `name`, or an ad-hoc one
    fn command_for(project: &Project, name: &str, args: &Args) -> (Option<usize>, BuildCommand) {
        match project
            .build_spec
            .iter()
            .position(|c| c.builder == name)
        {
            Some(index) => {
                let mut command = project.build_spec[index].clone();
                if !args.is_empty() {
                    command.args = args.clone();
                }
                (Some(index), command)
            }
            None => {
                let mut command = BuildCommand::new(name);
                command.args = args.clone();
                (None, command)
            }
        }
    }

    /// Scheduling rule needed to build `config`
    ///
    /// With a builder name, that builder's rule; otherwise the combination of
    /// the rules of every builder in the build spec. Inaccessible projects need no
    /// rule; unknown projects need the workspace rule.
    pub fn rule_for(
        &self,
        config: &BuildConfiguration,
        trigger: BuildTrigger,
        builder: Option<&str>,
        args: &Args,
    ) -> Option<SchedulingRule> {
        let Some(project) = self.workspace.project(&config.project) else {
            return Some(SchedulingRule::Workspace);
        };
        if !project.accessible {
            return None;
        }

        if let Some(name) = builder {
            let (index, command) = Self::command_for(&project, name, args);
            return match self.registry.resolve(&project, config, &command, index) {
                Resolution::Ready(instance) => instance.rule(config, trigger, &command.args),
                Resolution::Skip | Resolution::Remove => None,
            };
        }

        let rules: Vec<Option<SchedulingRule>> = project
            .build_spec
            .iter()
            .enumerate()
            .filter_map(|(index, command)| {
                match self.registry.resolve(&project, config, command, Some(index)) {
                    Resolution::Ready(instance) => {
                        Some(instance.rule(config, trigger, &command.args))
                    }
                    Resolution::Skip | Resolution::Remove => None,
                }
            })
            .collect();
        SchedulingRule::combine(rules)
    }

    /// Interrupt the autobuild before an explicit build
    ///
    /// Autobuilds run with the `Auto` trigger and never interrupt themselves.
    pub(crate) fn begin_operation(&self, trigger: BuildTrigger) {
        if trigger != BuildTrigger::Auto {
            self.interrupt();
        }
    }

    /// Wake an autobuild that an explicit build put to sleep
    pub(crate) fn end_operation(&self, trigger: BuildTrigger) {
        if trigger != BuildTrigger::Auto {
            self.resume_autobuild(false);
        }
    }

    /// Bookkeeping after every top-level build
    pub(crate) fn end_build(&self, trigger: BuildTrigger, cycle: &BuildCycle) {
        self.delta_cache.flush();
        match trigger {
            BuildTrigger::Clean => self.flags.force_build(),
            BuildTrigger::Incremental | BuildTrigger::Full => self.flags.avoid_build(),
            BuildTrigger::Auto => {}
        }
        if trigger != BuildTrigger::Incremental
            && trigger != BuildTrigger::Full
            && cycle.cancel.token().is_cancelled()
        {
            self.flags.avoid_build_if_not_interrupted();
        }
    }

    /// Snapshot of the persistent state of every builder
    pub fn save_state(&self) -> BuildState {
        let _lock = self.workspace.lock().acquire();
        BuildState::new(self.registry.persistent_infos())
    }

    /// Park persisted builder state; only the first call has an effect
    pub fn load_state(&self, state: BuildState) -> bool {
        tracing::debug!("Restoring state of {} builder(s)", state.builders.len());
        self.registry.restore(state.builders)
    }

    /// Replace a project's build spec, keeping existing builder state
    pub fn set_build_spec(
        &self,
        project: &str,
        spec: Vec<BuildCommand>,
    ) -> Result<(), WorkspaceError> {
        self.interrupt();
        let result = {
            let _lock = self.workspace.lock().acquire();
            self.workspace.require_project(project).and_then(|_| {
                self.registry.write_back(project);
                self.workspace.set_build_spec(project, spec)
            })
        };
        self.resume_autobuild(result.is_ok());
        result
    }

    /// Remove a project together with its builder state
    pub fn remove_project(&self, project: &str) -> Result<Project, WorkspaceError> {
        self.interrupt();
        let result = {
            let _lock = self.workspace.lock().acquire();
            self.workspace.remove_project(project).map(|removed| {
                self.registry.forget_project(project);
                removed
            })
        };
        self.resume_autobuild(result.is_ok());
        result
    }

    /// Last-built snapshot of every instantiated builder of a project
    pub fn builder_states(&self, project: &str) -> Vec<(InstanceKey, Option<Snapshot>)> {
        self.registry
            .instances_of(project)
            .iter()
            .map(|i| (i.key().clone(), i.last_built()))
            .collect()
    }
}
