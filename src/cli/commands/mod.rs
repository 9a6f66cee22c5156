//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod clean;
pub mod status;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use crate::core::manager::{BuildManager, BuildReport};
use crate::core::project::{Args, BuildConfiguration};
use crate::core::trigger::BuildTrigger;
use crate::error::BuildError;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the workspace incrementally
    Build {
        /// Rebuild everything, ignoring recorded state
        #[arg(long)]
        full: bool,

        /// Build projects concurrently along the dependency graph
        #[arg(long)]
        parallel: bool,

        /// Build only these projects (repeatable)
        #[arg(short, long = "project", value_name = "NAME")]
        projects: Vec<String>,

        /// Build this configuration instead of the active one
        #[arg(short, long, requires = "projects")]
        config: Option<String>,

        /// Run only this builder of each selected project
        #[arg(long, conflicts_with = "parallel")]
        builder: Option<String>,

        /// Builder argument as KEY=VALUE, used with --builder (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE", requires = "builder", value_parser = parse_arg)]
        args: Vec<(String, String)>,
    },

    /// Discard build outputs and recorded builder state
    Clean {
        /// Clean only these projects (repeatable)
        #[arg(short, long = "project", value_name = "NAME")]
        projects: Vec<String>,
    },

    /// Show projects, build order and what changed since the last build
    Status,

    /// Rebuild automatically when project files change
    Watch,
}

fn parse_arg(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

impl Commands {
    /// Execute the command against the workspace found from `dir`
    pub async fn run(self, dir: PathBuf, jobs: Option<usize>) -> Result<()> {
        match self {
            Self::Build {
                full,
                parallel,
                projects,
                config,
                builder,
                args,
            } => {
                let options = build::BuildOptions {
                    full,
                    parallel,
                    projects,
                    config,
                    builder,
                    args: args.into_iter().collect(),
                    jobs,
                };
                build::execute(&dir, options).await
            }
            Self::Clean { projects } => clean::execute(&dir, &projects, jobs).await,
            Self::Status => status::execute(&dir).await,
            Self::Watch => watch::execute(&dir, jobs).await,
        }
    }
}

/// What to run for a set of configurations
pub(crate) enum BuildPlan {
    /// Sequential build loop
    Sequential,
    /// Parallel build with this many jobs
    Parallel(usize),
    /// One builder per configuration
    Single { builder: String, args: Args },
}

/// Run a build on the blocking pool, canceling it on Ctrl-C
pub(crate) async fn run_build(
    manager: &Arc<BuildManager>,
    configs: Vec<BuildConfiguration>,
    trigger: BuildTrigger,
    plan: BuildPlan,
) -> Result<BuildReport, BuildError> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, canceling build");
                cancel.cancel();
            }
        })
    };

    let result = match plan {
        BuildPlan::Parallel(jobs) => {
            manager
                .build_parallel(&configs, trigger, jobs, cancel)
                .await
        }
        BuildPlan::Sequential => {
            let manager = Arc::clone(manager);
            tokio::task::spawn_blocking(move || manager.build(&configs, trigger, cancel))
                .await
                .unwrap_or_else(|e| Err(BuildError::Task(e.to_string())))
        }
        BuildPlan::Single { builder, args } => {
            let manager = Arc::clone(manager);
            tokio::task::spawn_blocking(move || {
                let mut merged = BuildReport::default();
                for config in &configs {
                    let report = manager.build_builder(
                        config,
                        trigger,
                        Some(&builder),
                        &args,
                        cancel.clone(),
                    )?;
                    merged.failures.extend(report.failures);
                    merged.warnings.extend(report.warnings);
                    merged.invocations.extend(report.invocations);
                    merged.skipped.extend(report.skipped);
                    merged.iterations = merged.iterations.max(1);
                }
                Ok(merged)
            })
            .await
            .unwrap_or_else(|e| Err(BuildError::Task(e.to_string())))
        }
    };

    interrupt.abort();
    result
}
