//! Build command implementation
//!
//! Implements `wsbuild build`: incremental or full builds of the whole
//! workspace or selected projects, sequentially or in parallel, or a single
//! named builder.

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::commands::{run_build, BuildPlan};
use crate::cli::output::{self, status};
use crate::cli::session::Session;
use crate::core::project::Args;
use crate::core::trigger::BuildTrigger;

/// Build options
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// Ignore recorded state and rebuild everything
    pub full: bool,
    /// Use the parallel build
    pub parallel: bool,
    /// Projects to build; all when empty
    pub projects: Vec<String>,
    /// Configuration to build instead of the active one
    pub config: Option<String>,
    /// Run only this builder
    pub builder: Option<String>,
    /// Arguments for `builder`
    pub args: Args,
    /// Parallel jobs override
    pub jobs: Option<usize>,
}

/// Execute the build command
pub async fn execute(dir: &Path, options: BuildOptions) -> Result<()> {
    let session = Session::open(dir, options.jobs)?;
    let configs = session.select_configs(&options.projects, options.config.as_deref())?;
    let trigger = if options.full {
        BuildTrigger::Full
    } else {
        BuildTrigger::Incremental
    };

    let parallel = options.parallel || session.global.build.parallel.unwrap_or(false);
    let plan = match options.builder {
        Some(builder) => BuildPlan::Single {
            builder,
            args: options.args,
        },
        None if parallel => BuildPlan::Parallel(session.manager.workspace().description().jobs),
        None => BuildPlan::Sequential,
    };

    tracing::info!("Building {} configuration(s)", configs.len());
    let spinner = output::create_spinner(&format!(
        "Running {trigger} build of {} configuration(s)",
        configs.len()
    ));
    let result = run_build(&session.manager, configs, trigger, plan).await;
    spinner.finish_and_clear();

    // builder state is saved even when the build was canceled
    session.save()?;
    let report = result.context("Build did not complete")?;
    output::print_report(&report);
    if report.capped {
        output::print_status(
            status::WARNING,
            "Stopped at the iteration cap with rebuilds still requested",
        );
    }
    report.into_result()?;
    Ok(())
}
