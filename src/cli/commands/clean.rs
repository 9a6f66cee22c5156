//! CLI implementation for `wsbuild clean`
//!
//! Runs every builder with the clean trigger, which discards its outputs and
//! its recorded state.

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::commands::{run_build, BuildPlan};
use crate::cli::output::{self, status};
use crate::cli::session::Session;
use crate::core::trigger::BuildTrigger;

/// Execute the clean command
pub async fn execute(dir: &Path, projects: &[String], jobs: Option<usize>) -> Result<()> {
    let session = Session::open(dir, jobs)?;
    let configs = session.select_configs(projects, None)?;

    let result = run_build(
        &session.manager,
        configs.clone(),
        BuildTrigger::Clean,
        BuildPlan::Sequential,
    )
    .await;
    session.save()?;
    let report = result.context("Clean did not complete")?;

    if output::is_json() {
        output::print_report(&report);
    } else {
        for failure in &report.failures {
            eprintln!("{} {failure}", status::ERROR);
        }
        if report.is_success() {
            output::print_status(
                status::SUCCESS,
                &format!("Cleaned {} configuration(s)", configs.len()),
            );
        }
    }
    report.into_result()?;
    Ok(())
}
