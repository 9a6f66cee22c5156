//! Shell command builder
//!
//! Runs `sh -c <command>` in the project directory. Arguments:
//!
//! - `command`: script run on full, incremental and auto builds (required)
//! - `clean`: script run on clean builds (optional)
//! - `depends`: comma-separated projects whose changes also trigger the builder
//!
//! The child sees `WSBUILD_PROJECT`, `WSBUILD_CONFIG`, `WSBUILD_TRIGGER` and
//! `WSBUILD_CHANGED` (newline-separated paths changed in the project, empty on
//! full builds). Output goes to `.wsbuild/logs/<project>.<config>.<builder>.log`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crate::config::defaults;
use crate::core::builder::Builder;
use crate::core::context::BuildContext;
use crate::core::project::{Args, BuildCommand};
use crate::core::registry::BuilderDescriptor;
use crate::core::trigger::BuildTrigger;
use crate::core::workspace::Workspace;
use crate::error::BuilderError;

/// How often a running child is checked for exit and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lines of the log quoted in failure messages
const FAILURE_TAIL_LINES: usize = 10;

/// Builder running shell commands
pub struct ShellBuilder {
    workspace: Arc<Workspace>,
    log_name: String,
}

impl ShellBuilder {
    /// Descriptor registering the shell builder for `workspace`
    pub fn descriptor(workspace: Arc<Workspace>) -> BuilderDescriptor {
        BuilderDescriptor::new(defaults::SHELL_BUILDER, move |command: &BuildCommand| {
            if !command.args.contains_key("command") {
                return Err("missing 'command' argument".to_string());
            }
            let log_name = command
                .args
                .get("id")
                .cloned()
                .unwrap_or_else(|| defaults::SHELL_BUILDER.to_string());
            Ok(Box::new(ShellBuilder {
                workspace: Arc::clone(&workspace),
                log_name,
            }) as Box<dyn Builder>)
        })
        .with_label("Shell command")
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        let root = self.workspace.root();
        self.workspace
            .project(project)
            .map_or_else(|| root.join(project), |p| p.dir(root))
    }

    fn log_path(&self, context: &BuildContext<'_>) -> PathBuf {
        self.workspace
            .root()
            .join(defaults::STATE_DIR)
            .join("logs")
            .join(format!(
                "{}.{}.{}.log",
                context.project(),
                context.config().name,
                self.log_name
            ))
    }

    fn changed_paths(context: &BuildContext<'_>) -> String {
        context
            .delta(context.project())
            .map(|delta| {
                delta
                    .changes
                    .iter()
                    .map(|change| change.path.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    fn run_script(
        &self,
        script: &str,
        trigger: BuildTrigger,
        context: &BuildContext<'_>,
    ) -> Result<(), BuilderError> {
        let dir = self.project_dir(context.project());
        let log_path = self.log_path(context);
        let log = open_log(&log_path)?;
        let err_log = log
            .try_clone()
            .map_err(|e| BuilderError::Failed(format!("Failed to open build log: {e}")))?;

        tracing::debug!("Running '{script}' in {}", dir.display());
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .current_dir(&dir)
            .env("WSBUILD_PROJECT", context.project())
            .env("WSBUILD_CONFIG", &context.config().name)
            .env("WSBUILD_TRIGGER", trigger.to_string())
            .env("WSBUILD_CHANGED", Self::changed_paths(context))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .spawn()
            .map_err(|e| {
                BuilderError::Failed(format!("Failed to run shell in {}: {e}", dir.display()))
            })?;

        let status = wait_or_cancel(child, context)?;
        if status.success() {
            Ok(())
        } else {
            Err(BuilderError::Failed(format!(
                "'{script}' exited with {status}{}",
                log_tail(&log_path)
            )))
        }
    }
}

impl Builder for ShellBuilder {
    fn build(
        &mut self,
        trigger: BuildTrigger,
        args: &Args,
        context: &BuildContext<'_>,
    ) -> Result<Vec<String>, BuilderError> {
        let script = args
            .get("command")
            .ok_or_else(|| BuilderError::Failed("missing 'command' argument".to_string()))?;
        self.run_script(script, trigger, context)?;
        Ok(interesting_projects(args))
    }

    fn clean(&mut self, args: &Args, context: &BuildContext<'_>) -> Result<(), BuilderError> {
        match args.get("clean") {
            Some(script) => self.run_script(script, BuildTrigger::Clean, context),
            None => Ok(()),
        }
    }
}

fn interesting_projects(args: &Args) -> Vec<String> {
    args.get("depends")
        .map(|depends| {
            depends
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn open_log(path: &Path) -> Result<File, BuilderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            BuilderError::Failed(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }
    File::create(path)
        .map_err(|e| BuilderError::Failed(format!("Failed to create {}: {e}", path.display())))
}

fn wait_or_cancel(mut child: Child, context: &BuildContext<'_>) -> Result<ExitStatus, BuilderError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => return Err(BuilderError::Failed(format!("Failed to wait for shell: {e}"))),
        }
        if context.is_canceled() {
            tracing::info!("Stopping shell builder for {}", context.config());
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill shell builder: {e}");
            }
            let _ = child.wait();
            return Err(BuilderError::Canceled);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn log_tail(path: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    format!("\n{}", lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::autobuild::AutoBuildFlags;
    use crate::core::context::{CancelCheck, RebuildRequests};
    use crate::core::project::{BuildConfiguration, Project};
    use crate::core::snapshot::MemoryTree;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn workspace(dir: &TempDir) -> Arc<Workspace> {
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        let workspace =
            Workspace::new(Arc::new(MemoryTree::new())).with_root(dir.path().to_path_buf());
        workspace.add_project(Project::new("lib")).unwrap();
        Arc::new(workspace)
    }

    fn builder(workspace: &Arc<Workspace>, command: &BuildCommand) -> Box<dyn Builder> {
        let descriptor = ShellBuilder::descriptor(Arc::clone(workspace));
        descriptor.instantiate(command).unwrap()
    }

    #[test]
    fn test_runs_in_project_dir_with_env() {
        let dir = TempDir::new().unwrap();
        let workspace = workspace(&dir);
        let command = BuildCommand::new("shell")
            .with_arg("command", "echo \"$WSBUILD_TRIGGER $WSBUILD_CONFIG\" > out.txt")
            .with_arg("depends", "core, util");
        let mut shell = builder(&workspace, &command);

        let requests = RebuildRequests::new();
        let cancel = CancelCheck::new(CancellationToken::new(), Arc::new(AutoBuildFlags::default()));
        let context = BuildContext::new(
            BuildConfiguration::new("lib", "default"),
            BuildTrigger::Full,
            &requests,
            &cancel,
        );
        let interesting = shell
            .build(BuildTrigger::Full, &command.args, &context)
            .unwrap();

        assert_eq!(interesting, vec!["core".to_string(), "util".to_string()]);
        let out = std::fs::read_to_string(dir.path().join("lib/out.txt")).unwrap();
        assert_eq!(out.trim(), "full default");
    }

    #[test]
    fn test_failure_quotes_log() {
        let dir = TempDir::new().unwrap();
        let workspace = workspace(&dir);
        let command = BuildCommand::new("shell").with_arg("command", "echo broken >&2; exit 3");
        let mut shell = builder(&workspace, &command);

        let requests = RebuildRequests::new();
        let cancel = CancelCheck::new(CancellationToken::new(), Arc::new(AutoBuildFlags::default()));
        let context = BuildContext::new(
            BuildConfiguration::new("lib", "default"),
            BuildTrigger::Incremental,
            &requests,
            &cancel,
        );
        let Err(BuilderError::Failed(message)) =
            shell.build(BuildTrigger::Incremental, &command.args, &context)
        else {
            panic!("expected failure");
        };
        assert!(message.contains("broken"));
    }

    #[test]
    fn test_cancellation_kills_child() {
        let dir = TempDir::new().unwrap();
        let workspace = workspace(&dir);
        let command = BuildCommand::new("shell").with_arg("command", "sleep 30");
        let mut shell = builder(&workspace, &command);

        let requests = RebuildRequests::new();
        let token = CancellationToken::new();
        token.cancel();
        let cancel = CancelCheck::new(token, Arc::new(AutoBuildFlags::default()));
        let context = BuildContext::new(
            BuildConfiguration::new("lib", "default"),
            BuildTrigger::Full,
            &requests,
            &cancel,
        );
        assert_eq!(
            shell.build(BuildTrigger::Full, &command.args, &context),
            Err(BuilderError::Canceled)
        );
    }

    #[test]
    fn test_missing_command_is_rejected_at_instantiation() {
        let dir = TempDir::new().unwrap();
        let descriptor = ShellBuilder::descriptor(workspace(&dir));
        assert!(descriptor.instantiate(&BuildCommand::new("shell")).is_err());
    }
}
