//! wsbuild CLI - incremental workspace build orchestrator
//!
//! Entry point for the wsbuild command-line application.

use anyhow::Result;
use clap::Parser;

use wsbuild::cli::output::{display_error, OutputConfig};
use wsbuild::cli::Cli;
use wsbuild::core::global_config::GlobalConfig;
use wsbuild::infra::dirs::WsbuildDirs;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Flags win over the global config's output preferences
    let global = GlobalConfig::load(&WsbuildDirs::new()).unwrap_or_default();
    let output_config = OutputConfig::new(
        cli.quiet || global.output.quiet.unwrap_or(false),
        cli.json || global.output.json.unwrap_or(false),
        cli.verbose,
    );
    output_config.apply_global();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(output_config.log_level().into()),
        )
        .init();

    match cli.run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            display_error(&e);
            std::process::exit(1);
        }
    }
}
