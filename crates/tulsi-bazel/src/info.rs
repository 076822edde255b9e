use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::Duration,
};

use crate::command::{BazelCommand, CommandRunner};

/// Paths reported by `bazel info`. Empty strings mean "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub execution_root: String,
    pub output_base: String,
    /// Name of the `*-bin` convenience symlink (`bazel-bin` unless renamed).
    pub bazel_bin_symlink_name: String,
}

impl WorkspaceInfo {
    pub fn is_complete(&self) -> bool {
        !self.execution_root.is_empty()
            && !self.output_base.is_empty()
            && !self.bazel_bin_symlink_name.is_empty()
    }
}

/// Parse `key: value` lines from `bazel info`.
pub fn parse_bazel_info(stdout: &str) -> WorkspaceInfo {
    let mut info = WorkspaceInfo::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "execution_root" => info.execution_root = value.to_string(),
            "output_base" => info.output_base = value.to_string(),
            _ if key.ends_with("-bin") => info.bazel_bin_symlink_name = key.to_string(),
            _ => {}
        }
    }
    info
}

/// Runs `bazel info` at most once and serves its results to every caller.
///
/// Concurrent first accesses block until the single fetch has finished.
/// Failures are logged and leave the affected values empty.
#[derive(Debug)]
pub struct WorkspacePathInfoFetcher<R: CommandRunner> {
    runner: Arc<R>,
    bazel: PathBuf,
    workspace_root: PathBuf,
    startup: Vec<String>,
    timeout: Option<Duration>,
    info: OnceLock<WorkspaceInfo>,
}

impl<R: CommandRunner> WorkspacePathInfoFetcher<R> {
    pub fn new(
        runner: Arc<R>,
        bazel: impl Into<PathBuf>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            bazel: bazel.into(),
            workspace_root: workspace_root.into(),
            startup: Vec::new(),
            timeout: None,
            info: OnceLock::new(),
        }
    }

    pub fn with_startup_options(mut self, startup: Vec<String>) -> Self {
        self.startup = startup;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn info(&self) -> &WorkspaceInfo {
        self.info.get_or_init(|| self.fetch())
    }

    pub fn execution_root(&self) -> &str {
        &self.info().execution_root
    }

    pub fn output_base(&self) -> &str {
        &self.info().output_base
    }

    pub fn bazel_bin_symlink_name(&self) -> &str {
        &self.info().bazel_bin_symlink_name
    }

    fn fetch(&self) -> WorkspaceInfo {
        if is_missing_binary(&self.bazel) {
            tracing::error!(
                target: "tulsi.bazel.info",
                bazel = %self.bazel.display(),
                "bazel binary does not exist"
            );
            return WorkspaceInfo::default();
        }

        let mut args = self.startup.clone();
        args.push("info".to_string());
        let command =
            BazelCommand::new(&self.workspace_root, &self.bazel, args).with_timeout(self.timeout);

        let output = match self.runner.run(&command) {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(target: "tulsi.bazel.info", command = %command, error = %err, "failed to run bazel info");
                return WorkspaceInfo::default();
            }
        };
        if !output.success() {
            tracing::error!(
                target: "tulsi.bazel.info",
                command = %command,
                exit_code = ?output.exit_code,
                "bazel info failed:\n{}",
                output.error_lines(3).join("\n")
            );
            return WorkspaceInfo::default();
        }

        let info = parse_bazel_info(&output.stdout);
        if !info.is_complete() {
            tracing::error!(target: "tulsi.bazel.info", ?info, "bazel info output is missing expected keys");
        }
        info
    }
}

/// A path-like bazel (`/usr/local/bin/bazel`, `tools/bazel`) that is not on
/// disk. Bare names are resolved through `PATH` at launch.
fn is_missing_binary(bazel: &Path) -> bool {
    bazel.components().count() > 1 && !bazel.is_file()
}
