//! Command-line interface module
//!
//! This module handles argument parsing, workspace loading and output
//! formatting. Build semantics belong in the [`crate::core`] module.

pub mod commands;
pub mod output;
pub mod session;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use commands::Commands;

/// wsbuild - incremental workspace build orchestrator
///
/// Builds the projects declared in wsbuild.toml in dependency order, only
/// re-running builders whose inputs changed.
#[derive(Parser, Debug)]
#[command(name = "wsbuild")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Number of parallel jobs
    #[arg(short, long, global = true, env = "WSBUILD_JOBS")]
    pub jobs: Option<usize>,

    /// Run as if started in this directory
    #[arg(short = 'C', long = "directory", global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        if let Some(cmd) = self.command {
            let dir = match self.directory {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            cmd.run(dir, self.jobs).await
        } else {
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            Ok(())
        }
    }
}
