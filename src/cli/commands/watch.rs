//! CLI implementation for `wsbuild watch`
//!
//! Polls the project directories and feeds every change to the autobuild job.
//! A change seen while an autobuild runs interrupts it; the job then runs again
//! with the new state.
//! Each finished autobuild is reported and the builder state saved. Ctrl-C
//! stops the job and saves the state one last time.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;

use crate::cli::output::{self, status};
use crate::cli::session::Session;
use crate::config::defaults;
use crate::core::autobuild::{AutoBuildJob, AutoBuildOutcome};
use crate::infra::filesystem::FsTree;

/// Execute the watch command
pub async fn execute(dir: &Path, jobs: Option<usize>) -> Result<()> {
    let session = Session::open(dir, jobs)?;
    let settings = session.autobuild_settings();
    if !settings.enabled {
        output::print_status(
            status::WARNING,
            "Autobuild is disabled in the manifest; changes will not be built",
        );
    }

    let job = AutoBuildJob::start(Arc::clone(&session.manager), settings);
    // build whatever changed while nobody was watching
    job.request_build(true);
    output::print_status(
        status::INFO,
        &format!("Watching {} (Ctrl-C to stop)", session.root.display()),
    );

    let mut ticker = tokio::time::interval(defaults::WATCH_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reported_runs = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {}
        }

        if rescan(&session.tree).await? {
            tracing::debug!("Change detected, requesting autobuild");
            job.interrupt();
            job.request_build(true);
        }

        let runs = job.runs();
        if runs != reported_runs {
            reported_runs = runs;
            if let Some(outcome) = job.last_outcome() {
                report_outcome(&outcome);
                if outcome != AutoBuildOutcome::Skipped {
                    session.save()?;
                }
            }
        }
    }

    output::print_status(status::INFO, "Stopping autobuild");
    job.shutdown();
    session.save()?;
    Ok(())
}

async fn rescan(tree: &Arc<FsTree>) -> Result<bool> {
    let tree = Arc::clone(tree);
    tokio::task::spawn_blocking(move || tree.rescan())
        .await
        .context("Workspace scan task failed")?
        .context("Failed to scan workspace")
}

fn report_outcome(outcome: &AutoBuildOutcome) {
    match outcome {
        AutoBuildOutcome::Built { failures: 0 } => {
            output::print_status(status::SUCCESS, "Autobuild finished");
        }
        AutoBuildOutcome::Built { failures } => {
            eprintln!("{} Autobuild finished with {failures} failed builder(s)", status::ERROR);
        }
        AutoBuildOutcome::Skipped => {}
        AutoBuildOutcome::Canceled => {
            output::print_status(status::WARNING, "Autobuild interrupted");
        }
        AutoBuildOutcome::Failed(message) => {
            eprintln!("{} Autobuild failed: {message}", status::ERROR);
        }
    }
}
