//! Background autobuild
//!
//! [`AutoBuildJob`] debounces workspace mutations into `Auto` builds. A single
//! worker task waits for the schedule deadline and runs the build on a
//! blocking thread; at most one autobuild runs at a time.
//!
//! Explicit builds feed back into the job through [`AutoBuildFlags`]: an
//! explicit incremental or full build makes the next autobuild unnecessary, a
//! clean makes it mandatory. Explicit builds and workspace changes made
//! through the manager interrupt the job and resume it once they are done.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::core::manager::BuildManager;
use crate::core::trigger::BuildTrigger;
use crate::error::BuildError;

/// Sticky flags shared between the build manager and the autobuild job
#[derive(Debug, Default)]
pub struct AutoBuildFlags {
    needs_build: AtomicBool,
    force_build: AtomicBool,
    avoid_build: AtomicBool,
    interrupted: AtomicBool,
}

impl AutoBuildFlags {
    /// Whether the running autobuild should stop
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_interrupted(&self, interrupted: bool) {
        self.interrupted.store(interrupted, Ordering::SeqCst);
    }

    /// Record that the workspace changed
    pub fn request(&self, needs_build: bool) {
        if needs_build {
            self.needs_build.store(true, Ordering::SeqCst);
        }
    }

    /// Whether a build has been requested
    pub fn needs_build(&self) -> bool {
        self.needs_build.load(Ordering::SeqCst)
    }

    /// Skip the next autobuild; an explicit build already covered it
    pub fn avoid_build(&self) {
        self.avoid_build.store(true, Ordering::SeqCst);
    }

    /// Skip the next autobuild unless it was interrupted
    pub fn avoid_build_if_not_interrupted(&self) {
        if !self.is_interrupted() {
            self.avoid_build();
        }
    }

    /// Run the next autobuild even without changes
    pub fn force_build(&self) {
        self.force_build.store(true, Ordering::SeqCst);
    }

    /// Decide whether an autobuild should run, then clear the sticky flags
    pub fn take_should_build(&self, enabled: bool) -> bool {
        let force = self.force_build.swap(false, Ordering::SeqCst);
        let avoid = self.avoid_build.swap(false, Ordering::SeqCst);
        let needs = self.needs_build.swap(false, Ordering::SeqCst);
        if !enabled {
            return false;
        }
        if force {
            return true;
        }
        !avoid && needs
    }
}

/// Autobuild timing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoBuildSettings {
    /// Whether mutations trigger builds
    pub enabled: bool,
    /// Shortest delay before a scheduled build starts
    pub min_delay: Duration,
    /// Delay right after a build finished
    pub max_delay: Duration,
}

impl Default for AutoBuildSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay: defaults::AUTOBUILD_MIN_DELAY,
            max_delay: defaults::AUTOBUILD_MAX_DELAY,
        }
    }
}

/// Lifecycle state of the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Nothing scheduled
    Idle,
    /// Waiting for the schedule deadline
    Scheduled,
    /// A build is running
    Running,
    /// Interrupted before it started; waits to be woken up
    Sleeping,
}

/// How the last autobuild run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoBuildOutcome {
    /// Built; the number of failed builders
    Built { failures: usize },
    /// Nothing needed building
    Skipped,
    /// Interrupted or canceled
    Canceled,
    /// The build itself failed
    Failed(String),
}

struct JobState {
    status: JobStatus,
    deadline: Option<Instant>,
    last_build: Option<Instant>,
    follow_up: bool,
    running_thread: Option<ThreadId>,
    run_cancel: Option<CancellationToken>,
    last_outcome: Option<AutoBuildOutcome>,
}

/// Debounced background build job
pub struct AutoBuildJob {
    manager: Arc<BuildManager>,
    flags: Arc<AutoBuildFlags>,
    settings: Mutex<AutoBuildSettings>,
    state: Mutex<JobState>,
    status_tx: watch::Sender<JobStatus>,
    wake: Notify,
    shutdown: CancellationToken,
    runs: AtomicUsize,
    handle: Handle,
}

impl AutoBuildJob {
    /// Create the job and start its worker on the current tokio runtime
    pub fn start(manager: Arc<BuildManager>, settings: AutoBuildSettings) -> Arc<Self> {
        let (status_tx, _) = watch::channel(JobStatus::Idle);
        let job = Arc::new(Self {
            flags: Arc::clone(manager.flags()),
            manager,
            settings: Mutex::new(settings),
            state: Mutex::new(JobState {
                status: JobStatus::Idle,
                deadline: None,
                last_build: None,
                follow_up: false,
                running_thread: None,
                run_cancel: None,
                last_outcome: None,
            }),
            status_tx,
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            runs: AtomicUsize::new(0),
            handle: Handle::current(),
        });
        job.manager.attach_autobuild(Arc::downgrade(&job));
        tokio::spawn(Arc::clone(&job).run_worker());
        job
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> AutoBuildSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, state: &mut JobState, status: JobStatus) {
        state.status = status;
        self.status_tx.send_replace(status);
    }

    /// Current lifecycle state
    pub fn status(&self) -> JobStatus {
        self.lock_state().status
    }

    /// Whether a build is scheduled, sleeping or running
    pub fn is_pending(&self) -> bool {
        self.status() != JobStatus::Idle
    }

    /// Whether the job is interrupted
    pub fn is_interrupted(&self) -> bool {
        self.flags.is_interrupted()
    }

    /// Number of completed runs, including skipped and canceled ones
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// How the last run ended
    pub fn last_outcome(&self) -> Option<AutoBuildOutcome> {
        self.lock_state().last_outcome.clone()
    }

    /// Whether mutations trigger builds
    pub fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    /// Turn autobuild on or off
    ///
    /// Turning it on forces one build.
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = {
            let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut settings.enabled, enabled)
        };
        if enabled && !was_enabled {
            tracing::debug!("Autobuild enabled");
            self.flags.force_build();
            self.request_build(true);
        }
    }

    /// Change the scheduling delays; applies to the next schedule
    pub fn set_delays(&self, min_delay: Duration, max_delay: Duration) {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        settings.min_delay = min_delay;
        settings.max_delay = max_delay.max(min_delay);
    }

    fn compute_delay(&self, state: &JobState) -> Duration {
        let settings = self.settings();
        let since_last = state
            .last_build
            .map_or(settings.max_delay, |last| last.elapsed());
        settings
            .max_delay
            .saturating_sub(since_last)
            .max(settings.min_delay)
    }

    fn schedule(&self, state: &mut JobState, delay: Duration) {
        state.deadline = Some(Instant::now() + delay);
        self.set_status(state, JobStatus::Scheduled);
        self.wake.notify_one();
    }

    /// Report a workspace mutation
    ///
    /// Schedules an autobuild when enabled; otherwise only the build event
    /// pair is fired.
    pub fn request_build(&self, needs_build: bool) {
        self.flags.request(needs_build);

        if !self.is_enabled() {
            let manager = Arc::clone(&self.manager);
            self.handle
                .spawn_blocking(move || manager.notify_no_build(BuildTrigger::Auto));
            return;
        }

        let mut state = self.lock_state();
        if state.status != JobStatus::Running {
            self.flags.set_interrupted(false);
        }
        match state.status {
            JobStatus::Idle | JobStatus::Sleeping | JobStatus::Scheduled => {
                let delay = self.compute_delay(&state);
                tracing::trace!("Autobuild scheduled in {delay:?}");
                self.schedule(&mut state, delay);
            }
            JobStatus::Running => {
                let from_job = state.running_thread == Some(thread::current().id());
                if !from_job && self.flags.needs_build() {
                    state.follow_up = true;
                }
            }
        }
    }

    /// Pick up after a workspace operation
    ///
    /// Records the changes the operation made and wakes a job it put to sleep.
    pub fn resume(&self, needs_build: bool) {
        if needs_build || self.status() == JobStatus::Sleeping {
            self.request_build(needs_build);
        }
    }

    /// Interrupt a scheduled or running autobuild
    ///
    /// A scheduled build goes to sleep; a running build stops at its next
    /// checkpoint and is rescheduled. Calls from the build itself are ignored.
    pub fn interrupt(&self) {
        if self.flags.is_interrupted() {
            return;
        }
        let mut state = self.lock_state();
        match state.status {
            JobStatus::Idle | JobStatus::Sleeping => return,
            JobStatus::Scheduled => {
                tracing::debug!("Autobuild interrupted before it started");
                state.deadline = None;
                self.set_status(&mut state, JobStatus::Sleeping);
                self.flags.set_interrupted(true);
            }
            JobStatus::Running => {
                if state.running_thread == Some(thread::current().id()) {
                    return;
                }
                tracing::debug!("Interrupting running autobuild");
                self.flags.set_interrupted(true);
            }
        }
        if self.flags.is_interrupted() {
            // an interrupted build must run again
            self.flags.avoid_build.store(false, Ordering::SeqCst);
        }
    }

    /// Cancel the scheduled or running autobuild without rescheduling it
    pub fn cancel(&self) {
        let mut state = self.lock_state();
        match state.status {
            JobStatus::Scheduled | JobStatus::Sleeping => {
                state.deadline = None;
                self.set_status(&mut state, JobStatus::Idle);
            }
            JobStatus::Running => {
                if let Some(token) = &state.run_cancel {
                    token.cancel();
                }
            }
            JobStatus::Idle => {}
        }
    }

    /// Wake a sleeping job and wait until no autobuild is pending
    pub async fn wait_for_idle(&self) {
        {
            let mut state = self.lock_state();
            if state.status == JobStatus::Sleeping {
                self.flags.set_interrupted(false);
                self.schedule(&mut state, Duration::ZERO);
            }
        }
        let mut status = self.status_tx.subscribe();
        // the sender lives as long as the job
        let _ = status.wait_for(|s| *s == JobStatus::Idle).await;
    }

    /// Stop the worker; a running build is canceled
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.cancel();
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let deadline = {
                let state = self.lock_state();
                match state.status {
                    JobStatus::Scheduled => state.deadline,
                    _ => None,
                }
            };

            match deadline {
                None => {
                    tokio::select! {
                        () = self.wake.notified() => continue,
                        () = self.shutdown.cancelled() => break,
                    }
                }
                Some(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {}
                        () = self.wake.notified() => continue,
                        () = self.shutdown.cancelled() => break,
                    }
                }
            }

            let run_cancel = {
                let mut state = self.lock_state();
                let due = state.deadline.is_some_and(|d| d <= Instant::now());
                if state.status != JobStatus::Scheduled || !due {
                    continue;
                }
                let token = self.shutdown.child_token();
                state.deadline = None;
                state.run_cancel = Some(token.clone());
                self.set_status(&mut state, JobStatus::Running);
                token
            };

            let job = Arc::clone(&self);
            let outcome = tokio::task::spawn_blocking(move || job.run_once(run_cancel))
                .await
                .unwrap_or_else(|e| Err(BuildError::Task(e.to_string())));
            self.finish_run(outcome);
        }
        tracing::debug!("Autobuild worker stopped");
    }

    fn run_once(&self, cancel: CancellationToken) -> Result<AutoBuildOutcome, BuildError> {
        self.lock_state().running_thread = Some(thread::current().id());
        if !self.flags.take_should_build(self.is_enabled()) {
            self.manager.notify_no_build(BuildTrigger::Auto);
            return Ok(AutoBuildOutcome::Skipped);
        }
        tracing::info!("Running autobuild");
        let report = self.manager.build_workspace(BuildTrigger::Auto, cancel)?;
        Ok(AutoBuildOutcome::Built {
            failures: report.failures.len(),
        })
    }

    fn finish_run(&self, outcome: Result<AutoBuildOutcome, BuildError>) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock_state();
        state.running_thread = None;
        state.run_cancel = None;

        match outcome {
            Err(BuildError::Canceled) => {
                // the changes still need building
                self.flags.request(true);
                state.last_outcome = Some(AutoBuildOutcome::Canceled);
                if self.flags.is_interrupted() && !self.shutdown.is_cancelled() {
                    tracing::debug!("Autobuild was interrupted, rescheduling");
                    self.flags.set_interrupted(false);
                    state.follow_up = false;
                    let delay = self.compute_delay(&state);
                    self.schedule(&mut state, delay);
                    return;
                }
            }
            Err(e) => {
                tracing::error!("Autobuild failed: {e}");
                state.last_outcome = Some(AutoBuildOutcome::Failed(e.to_string()));
                state.last_build = Some(Instant::now());
            }
            Ok(outcome) => {
                self.flags.set_interrupted(false);
                state.last_outcome = Some(outcome);
                state.last_build = Some(Instant::now());
            }
        }

        if std::mem::take(&mut state.follow_up) && !self.shutdown.is_cancelled() {
            let delay = self.compute_delay(&state);
            self.schedule(&mut state, delay);
        } else {
            self.set_status(&mut state, JobStatus::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_build_clears_flags() {
        let flags = AutoBuildFlags::default();
        flags.request(true);
        assert!(flags.take_should_build(true));
        assert!(!flags.take_should_build(true));
    }

    #[test]
    fn test_avoid_wins_over_needs_but_not_force() {
        let flags = AutoBuildFlags::default();
        flags.request(true);
        flags.avoid_build();
        assert!(!flags.take_should_build(true));

        flags.request(true);
        flags.avoid_build();
        flags.force_build();
        assert!(flags.take_should_build(true));
    }

    #[test]
    fn test_disabled_never_builds_and_still_clears() {
        let flags = AutoBuildFlags::default();
        flags.force_build();
        assert!(!flags.take_should_build(false));
        assert!(!flags.take_should_build(true));
    }

    #[test]
    fn test_avoid_if_not_interrupted() {
        let flags = AutoBuildFlags::default();
        flags.set_interrupted(true);
        flags.avoid_build_if_not_interrupted();
        flags.request(true);
        assert!(flags.take_should_build(true));
    }
}
