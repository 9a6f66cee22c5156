//! Parallel build
//!
//! Configurations form a digraph over direct project dependencies. A node is
//! dispatched once all its predecessors finished, to a blocking worker that
//! takes the node's scheduling rule and the workspace lock before running the
//! configuration's build spec. At most `jobs` nodes run at the same time.
//!
//! There is no build loop: rebuild requests raised by builders are reported
//! and dropped. A node that cannot be built (as opposed to a builder that
//! reports a failure) holds back everything depending on it; those
//! configurations are listed in [`BuildReport::skipped`].

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::context::CancelCheck;
use crate::core::manager::{panic_message, BuildCycle, BuildManager, BuildReport};
use crate::core::project::{Args, BuildConfiguration};
use crate::core::resolver::ConfigGraph;
use crate::core::trigger::BuildTrigger;
use crate::error::BuildError;

impl BuildManager {
    /// Build `configs` concurrently, honoring project dependencies
    pub async fn build_parallel(
        self: &Arc<Self>,
        configs: &[BuildConfiguration],
        trigger: BuildTrigger,
        jobs: usize,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        self.begin_operation(trigger);
        let result = self.build_graph(configs, trigger, jobs, cancel).await;
        self.end_operation(trigger);
        result
    }

    async fn build_graph(
        self: &Arc<Self>,
        configs: &[BuildConfiguration],
        trigger: BuildTrigger,
        jobs: usize,
        cancel: CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        for config in configs {
            self.workspace().validate_config(config)?;
        }
        let graph = self.workspace().config_graph(configs.to_vec())?;
        let cycle = Arc::new(BuildCycle::new(
            configs.to_vec(),
            graph.vertices().to_vec(),
            CancelCheck::new(cancel, Arc::clone(self.flags())),
        ));

        tracing::info!(
            "Starting parallel {trigger} build of {} configuration(s) with {jobs} job(s)",
            graph.len()
        );
        let result = {
            let _events = self.events(trigger);
            self.run_graph(&graph, &cycle, trigger, jobs).await
        };
        self.report_ignored_requests(&cycle);
        self.end_build(trigger, &cycle);
        result?;

        let cycle = Arc::try_unwrap(cycle)
            .map_err(|_| BuildError::Task("build workers still running".to_string()))?;
        let mut report = cycle.into_report();
        report.iterations = 1;
        Ok(report)
    }

    async fn run_graph(
        self: &Arc<Self>,
        graph: &ConfigGraph,
        cycle: &Arc<BuildCycle>,
        trigger: BuildTrigger,
        jobs: usize,
    ) -> Result<(), BuildError> {
        let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
        let mut waiting: Vec<usize> = (0..graph.len())
            .map(|i| graph.predecessors(i).len())
            .collect();
        let mut ready: VecDeque<usize> = (0..graph.len()).filter(|&i| waiting[i] == 0).collect();
        // root node whose error keeps each node from running
        let mut blocked_by: Vec<Option<usize>> = vec![None; graph.len()];
        let mut running = JoinSet::new();
        let mut canceled = false;

        loop {
            while !canceled {
                let Some(index) = ready.pop_front() else {
                    break;
                };
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| BuildError::Task(e.to_string()))?;
                let manager = Arc::clone(self);
                let cycle = Arc::clone(cycle);
                let config = graph.vertices()[index].clone();
                running.spawn_blocking(move || {
                    let _permit = permit;
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        manager.build_node(&cycle, &config, trigger)
                    }))
                    .unwrap_or_else(|payload| {
                        Err(BuildError::Task(format!(
                            "build panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });
                    (index, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (index, result) = joined.map_err(|e| BuildError::Task(e.to_string()))?;
            match result {
                Ok(()) => {
                    for &next in graph.successors(index) {
                        waiting[next] -= 1;
                        if waiting[next] == 0 {
                            ready.push_back(next);
                        }
                    }
                }
                Err(BuildError::Canceled) => {
                    if !canceled {
                        tracing::info!("Parallel build canceled, waiting for running builders");
                    }
                    canceled = true;
                }
                Err(e) => {
                    tracing::error!("Building {} failed: {e}", graph.vertices()[index]);
                    cycle.warn(format!("{}: {e}", graph.vertices()[index]));
                    Self::block_dependents(graph, index, &mut blocked_by);
                }
            }
        }

        if canceled {
            return Err(BuildError::Canceled);
        }
        Self::report_skipped(graph, cycle, &blocked_by);
        Ok(())
    }

    /// Mark every transitive successor of the failed node `root`
    fn block_dependents(graph: &ConfigGraph, root: usize, blocked_by: &mut [Option<usize>]) {
        let mut queue: VecDeque<usize> = graph.successors(root).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if blocked_by[next].is_none() {
                blocked_by[next] = Some(root);
                queue.extend(graph.successors(next).iter().copied());
            }
        }
    }

    fn report_skipped(graph: &ConfigGraph, cycle: &BuildCycle, blocked_by: &[Option<usize>]) {
        for (index, root) in blocked_by.iter().enumerate() {
            let Some(root) = *root else {
                continue;
            };
            let config = &graph.vertices()[index];
            let failed = &graph.vertices()[root];
            tracing::warn!("Skipped {config}: {failed} could not be built");
            cycle.warn(format!("{config} was not built because {failed} could not be built"));
            cycle.report().skipped.push(config.clone());
        }
    }

    /// Build one graph node on a blocking worker
    fn build_node(
        &self,
        cycle: &BuildCycle,
        config: &BuildConfiguration,
        trigger: BuildTrigger,
    ) -> Result<(), BuildError> {
        cycle.cancel.check(trigger)?;
        let rule = self.rule_for(config, trigger, None, &Args::new());
        let _rule = self.begin_rule(cycle, rule, trigger)?;
        let _lock = self.workspace().lock().acquire();
        self.build_config(cycle, config, trigger, false, 0)?;
        cycle.requests.mark_built(&config.project);
        Ok(())
    }

    fn report_ignored_requests(&self, cycle: &BuildCycle) {
        if cycle.requests.rebuild_all() {
            tracing::error!("A builder requested a rebuild during a parallel build; ignored");
            cycle.warn("rebuild requested during a parallel build was ignored".to_string());
        }
        for project in cycle.requests.pending_projects() {
            tracing::error!(
                "Rebuild of '{project}' requested during a parallel build; not rebuilt"
            );
            cycle.warn(format!(
                "rebuild of '{project}' requested during a parallel build was ignored"
            ));
        }
        cycle.requests.clear();
    }
}
