//! Integration tests for the parallel build
//!
//! Nodes start once their dependencies finished, at most `jobs` at a time,
//! and rebuild requests are reported instead of looping.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Harness;
use tokio_util::sync::CancellationToken;

use wsbuild::core::builder::Builder;
use wsbuild::core::context::BuildContext;
use wsbuild::core::project::{Args, BuildCommand, BuildConfiguration, Project};
use wsbuild::core::registry::BuilderDescriptor;
use wsbuild::core::rules::SchedulingRule;
use wsbuild::core::trigger::BuildTrigger;
use wsbuild::error::{BuildError, BuilderError};

fn configs(harness: &Harness) -> Vec<BuildConfiguration> {
    harness.manager.workspace().active_configs().unwrap()
}

fn project(name: &str, builder: &str) -> Project {
    Project::new(name).with_builder(BuildCommand::new(builder))
}

/// Tracks how many builder bodies run at once
#[derive(Default)]
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn sleeping_builder(harness: &Harness, id: &str, delay: Duration) -> Arc<Concurrency> {
    let concurrency = Arc::new(Concurrency::default());
    let tracker = Arc::clone(&concurrency);
    harness.register(id, move |_| {
        tracker.enter();
        std::thread::sleep(delay);
        tracker.exit();
        Ok(Vec::new())
    });
    concurrency
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dependencies_finish_before_dependents_start() {
    let harness = Harness::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    harness.register("b", move |context| {
        sink.lock().unwrap().push(format!("start:{}", context.project()));
        std::thread::sleep(Duration::from_millis(20));
        sink.lock().unwrap().push(format!("end:{}", context.project()));
        Ok(Vec::new())
    });
    harness.add(project("core", "b"));
    harness.add(project("net", "b").depends_on("core"));
    harness.add(project("ui", "b").depends_on("core"));
    harness.add(project("app", "b").depends_on("net").depends_on("ui"));

    let report = harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 4, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.invocations.len(), 4);
    assert_eq!(report.iterations, 1);

    let log = log.lock().unwrap().clone();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    for (dependency, dependent) in [("core", "net"), ("core", "ui"), ("net", "app"), ("ui", "app")] {
        assert!(
            position(&format!("end:{dependency}")) < position(&format!("start:{dependent}")),
            "{dependent} started before {dependency} finished: {log:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jobs_bound_concurrency() {
    let harness = Harness::new();
    let concurrency = sleeping_builder(&harness, "b", Duration::from_millis(50));
    for name in ["a", "b", "c", "d", "e", "f"] {
        harness.add(project(name, "b"));
    }

    let report = harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 2, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.invocations.len(), 6);
    assert!(concurrency.peak() <= 2, "peak was {}", concurrency.peak());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_builders_overlap() {
    let harness = Harness::new();
    let concurrency = sleeping_builder(&harness, "b", Duration::from_millis(150));
    for name in ["a", "b", "c", "d"] {
        harness.add(project(name, "b"));
    }

    harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 4, CancellationToken::new())
        .await
        .unwrap();

    // builder bodies run without the workspace lock
    assert!(concurrency.peak() >= 2, "peak was {}", concurrency.peak());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rebuild_requests_are_reported_not_run() {
    let harness = Harness::new();
    harness.register("b", |context| {
        context.request_project_rebuild(true);
        Ok(Vec::new())
    });
    harness.add(project("core", "b"));
    harness.add(project("ui", "b").depends_on("core"));

    let report = harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 2, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.invocations_of("b"), 2);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings.iter().all(|w| w.contains("ignored")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_builder_failure_does_not_stop_dependents() {
    let harness = Harness::new();
    harness.register("broken", |_| Err(BuilderError::Failed("compile error".to_string())));
    harness.record("b");
    harness.add(project("core", "broken"));
    harness.add(project("ui", "b").depends_on("core"));

    let report = harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 2, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].builder, "broken");
    assert_eq!(harness.calls(), vec!["core:broken", "ui:b"]);
}

/// Builder whose rule lookup panics, so its project cannot be built at all
struct BrokenRule;

impl Builder for BrokenRule {
    fn build(
        &mut self,
        _trigger: BuildTrigger,
        _args: &Args,
        _context: &BuildContext<'_>,
    ) -> Result<Vec<String>, BuilderError> {
        Ok(Vec::new())
    }

    fn rule(
        &self,
        _config: &BuildConfiguration,
        _trigger: BuildTrigger,
        _args: &Args,
    ) -> Option<SchedulingRule> {
        panic!("rule lookup failed");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dependents_of_an_unbuildable_node_are_skipped() {
    let harness = Harness::new();
    harness
        .manager
        .register(BuilderDescriptor::new("broken-rule", |_| {
            Ok(Box::new(BrokenRule) as Box<dyn Builder>)
        }));
    harness.record("b");
    harness.add(project("lib", "broken-rule"));
    harness.add(project("app", "b").depends_on("lib"));
    harness.add(project("cli", "b").depends_on("app"));
    harness.add(project("tool", "b"));

    let report = harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 2, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(harness.calls(), vec!["tool:b"]);
    assert_eq!(
        report.skipped,
        vec![
            BuildConfiguration::new("app", "default"),
            BuildConfiguration::new("cli", "default"),
        ]
    );
    assert!(report.warnings.iter().any(|w| w.contains("rule lookup failed")));
    for skipped in ["app/default", "cli/default"] {
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.starts_with(skipped) && w.contains("lib/default")),
            "no warning for {skipped}: {:?}",
            report.warnings
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_stops_scheduling() {
    let harness = Harness::new();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let started_tx = Mutex::new(Some(started_tx));
    harness.register("slow", move |context| {
        if let Some(tx) = started_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        for _ in 0..1000 {
            if context.is_canceled() {
                return Err(BuilderError::Canceled);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(Vec::new())
    });
    harness.record("b");
    harness.add(project("core", "slow"));
    harness.add(project("ui", "b").depends_on("core"));

    let token = CancellationToken::new();
    let canceler = token.clone();
    tokio::spawn(async move {
        let _ = started_rx.await;
        canceler.cancel();
    });

    let result = harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 2, token)
        .await;

    assert!(matches!(result, Err(BuildError::Canceled)));
    assert_eq!(harness.calls(), vec!["core:slow"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_closed_projects_are_skipped() {
    let harness = Harness::new();
    harness.record("b");
    harness.add(project("core", "b"));
    harness.add(project("ui", "b"));
    harness
        .manager
        .workspace()
        .set_accessible("ui", false)
        .unwrap();

    let report = harness
        .manager
        .build_parallel(&configs(&harness), BuildTrigger::Full, 2, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(harness.calls(), vec!["core:b"]);
    assert_eq!(report.invocations.len(), 1);
}
