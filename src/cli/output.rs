//! Output formatting and progress indicators
//!
//! Progress spinners, status-prefixed messages and build report rendering.
//! Quiet and JSON modes are applied once at startup and consulted by every
//! printing helper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::core::manager::BuildReport;

static QUIET: AtomicBool = AtomicBool::new(false);
static JSON: AtomicBool = AtomicBool::new(false);

/// Output preferences resolved from flags and the global config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    /// Only errors are printed
    pub quiet: bool,
    /// Machine-readable output
    pub json: bool,
    /// Verbosity level from `-v`
    pub verbose: u8,
}

impl OutputConfig {
    /// Create output preferences
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Make these preferences visible to the printing helpers
    pub fn apply_global(self) {
        QUIET.store(self.quiet, Ordering::Relaxed);
        JSON.store(self.json, Ordering::Relaxed);
    }

    /// Tracing filter directive for the verbosity level
    pub fn log_level(self) -> tracing::Level {
        match (self.quiet, self.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::INFO,
            (false, _) => tracing::Level::DEBUG,
        }
    }
}

/// Whether quiet mode is on
pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Whether JSON mode is on
pub fn is_json() -> bool {
    JSON.load(Ordering::Relaxed)
}

/// Create a spinner for operations with unknown duration
///
/// Hidden in quiet and JSON modes.
pub fn create_spinner(message: &str) -> ProgressBar {
    if is_quiet() || is_json() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Print a status-prefixed line unless quiet or JSON output is on
pub fn print_status(prefix: &str, message: &str) {
    if !is_quiet() && !is_json() {
        println!("{prefix} {message}");
    }
}

/// Print an error with its cause chain
pub fn display_error(error: &anyhow::Error) {
    if is_json() {
        let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
        eprintln!("{}", json!({ "error": error.to_string(), "causes": causes }));
        return;
    }
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// JSON rendering of a build report
pub fn report_json(report: &BuildReport) -> serde_json::Value {
    json!({
        "success": report.is_success(),
        "iterations": report.iterations,
        "capped": report.capped,
        "invocations": report.invocations.iter().map(|i| json!({
            "config": i.config.to_string(),
            "builder": i.builder,
            "trigger": i.trigger.to_string(),
            "iteration": i.iteration,
        })).collect::<Vec<_>>(),
        "failures": report.failures.iter().map(|f| json!({
            "config": f.config,
            "builder": f.builder,
            "message": f.message,
        })).collect::<Vec<_>>(),
        "warnings": report.warnings,
        "skipped": report.skipped.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

/// Print a build report in the selected output mode
pub fn print_report(report: &BuildReport) {
    if is_json() {
        println!("{}", report_json(report));
        return;
    }
    for warning in &report.warnings {
        if !is_quiet() {
            eprintln!("{} {warning}", status::WARNING);
        }
    }
    for failure in &report.failures {
        eprintln!("{} {failure}", status::ERROR);
    }
    if report.is_success() {
        print_status(
            status::SUCCESS,
            &format!(
                "Build finished: {} builder invocation(s) in {} iteration(s)",
                report.invocations.len(),
                report.iterations
            ),
        );
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manager::Invocation;
    use crate::core::project::BuildConfiguration;
    use crate::core::trigger::BuildTrigger;
    use crate::error::BuilderFailure;

    #[test]
    fn test_log_level_follows_flags() {
        assert_eq!(OutputConfig::new(false, false, 0).log_level(), tracing::Level::WARN);
        assert_eq!(OutputConfig::new(false, false, 1).log_level(), tracing::Level::INFO);
        assert_eq!(OutputConfig::new(false, false, 3).log_level(), tracing::Level::DEBUG);
        assert_eq!(OutputConfig::new(true, false, 2).log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_report_json_shape() {
        let report = BuildReport {
            failures: vec![BuilderFailure {
                config: "app/default".to_string(),
                builder: "shell".to_string(),
                message: "exit 1".to_string(),
            }],
            warnings: Vec::new(),
            invocations: vec![Invocation {
                config: BuildConfiguration::new("app", "default"),
                builder: "shell".to_string(),
                trigger: BuildTrigger::Full,
                iteration: 0,
            }],
            iterations: 1,
            capped: false,
            skipped: vec![BuildConfiguration::new("cli", "default")],
        };
        let value = report_json(&report);
        assert_eq!(value["success"], false);
        assert_eq!(value["invocations"][0]["config"], "app/default");
        assert_eq!(value["invocations"][0]["trigger"], "full");
        assert_eq!(value["failures"][0]["message"], "exit 1");
        assert_eq!(value["skipped"][0], "cli/default");
    }
}
