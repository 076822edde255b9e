use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use rayon::prelude::*;
use tulsi_model::{BuildLabel, RuleEntryMap};

use crate::{
    aspect_info::{parse_rule_entry_file, TULSIINFO_SUFFIX},
    bep::read_build_events,
    command::{BazelCommand, CommandOutput, CommandRunner},
    debug_info::{DebugInfo, DebugInfoQueue},
    error::{ArtifactParseError, ExtractorError},
};

/// Prefix of the convenience symlinks created by aspect builds. Kept apart from
/// the user's `bazel-*` links so generation never clobbers them.
pub const ASPECT_SYMLINK_PREFIX: &str = "tulsigen-";

const ASPECT_REPOSITORY: &str = "tulsi";
const ASPECT: &str = "@tulsi//tulsi:tulsi_aspects.bzl%tulsi_sources_aspect";
const OUTPUT_GROUPS: &str = "--output_groups=tulsi-info,-_,-default";

static BEP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// User options layered onto an aspect build, already split into argv form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AspectOptions {
    pub startup: Vec<String>,
    pub build: Vec<String>,
    pub project_generation: Vec<String>,
    /// Pass `--noexpand_test_suites` so the aspect sees `test_suite` targets.
    pub no_expand_test_suites: bool,
}

/// An artifact that was discovered but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    pub path: PathBuf,
    pub error: ArtifactParseError,
}

/// Result of one aspect build: everything that decoded, plus the artifacts
/// that did not.
#[derive(Debug, Clone, Default)]
pub struct AspectExtraction {
    pub entries: RuleEntryMap,
    pub failures: Vec<ArtifactFailure>,
}

impl AspectExtraction {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Resolves rule entries by building the requested targets with the Tulsi
/// aspect attached and reading the `.tulsiinfo` files it emits.
#[derive(Debug)]
pub struct AspectExtractor<R: CommandRunner> {
    runner: Arc<R>,
    bazel: PathBuf,
    workspace_root: PathBuf,
    aspect_workspace: PathBuf,
    timeout: Option<Duration>,
    debug_info: Arc<DebugInfoQueue>,
}

impl<R: CommandRunner> AspectExtractor<R> {
    pub fn new(
        runner: Arc<R>,
        bazel: impl Into<PathBuf>,
        workspace_root: impl Into<PathBuf>,
        aspect_workspace: impl Into<PathBuf>,
        debug_info: Arc<DebugInfoQueue>,
    ) -> Self {
        Self {
            runner,
            bazel: bazel.into(),
            workspace_root: workspace_root.into(),
            aspect_workspace: aspect_workspace.into(),
            timeout: None,
            debug_info,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The full `bazel build` invocation for `labels`, writing build events to
    /// `bep_path`.
    pub fn build_command(
        &self,
        labels: &[BuildLabel],
        options: &AspectOptions,
        bep_path: &Path,
    ) -> BazelCommand {
        let mut args = options.startup.clone();
        args.extend(
            [
                "build",
                "-c",
                "dbg",
                "--symlink_prefix",
                ASPECT_SYMLINK_PREFIX,
                "--announce_rc",
                "--nocheck_visibility",
                "--show_result=0",
                "--noshow_loading_progress",
                "--noshow_progress",
            ]
            .map(String::from),
        );
        args.push(format!(
            "--override_repository={ASPECT_REPOSITORY}={}",
            self.aspect_workspace.display()
        ));
        args.push("--aspects".to_string());
        args.push(ASPECT.to_string());
        args.push(OUTPUT_GROUPS.to_string());
        args.push(format!(
            "--tool_tag=tulsi_v{}:generator",
            env!("CARGO_PKG_VERSION")
        ));
        args.push(format!("--build_event_json_file={}", bep_path.display()));
        args.push("--noexperimental_build_event_json_file_path_conversion".to_string());
        if options.no_expand_test_suites {
            args.push("--noexpand_test_suites".to_string());
        }
        args.extend(options.project_generation.iter().cloned());
        args.extend(options.build.iter().cloned());
        args.extend(labels.iter().map(|label| label.as_str().to_string()));

        BazelCommand::new(&self.workspace_root, &self.bazel, args).with_timeout(self.timeout)
    }

    /// Run one aspect build over `labels` and decode every artifact it reports.
    ///
    /// A failed build, or a successful one that reports no artifacts, is an
    /// error. Individual artifacts that fail to decode are returned in
    /// [`AspectExtraction::failures`] alongside everything that did decode.
    ///
    /// Artifact paths in the build event stream are normally absolute. Relative
    /// ones are resolved against `execution_root`, which is only called when
    /// such a path is seen.
    pub fn extract(
        &self,
        labels: &[BuildLabel],
        options: &AspectOptions,
        execution_root: impl FnOnce() -> PathBuf,
    ) -> Result<AspectExtraction, ExtractorError> {
        let bep_path = unique_bep_path();
        let command = self.build_command(labels, options, &bep_path);

        tracing::info!(
            target: "tulsi.bazel.aspect",
            targets = labels.len(),
            "running aspect build"
        );
        let started = Instant::now();
        let result = self.build_and_collect(&command, &bep_path, execution_root);

        self.remove_generated_symlinks();
        match fs::remove_file(&bep_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::debug!(target: "tulsi.bazel.aspect", path = %bep_path.display(), error = %err, "failed to remove build event file");
            }
        }

        if let Ok(extraction) = &result {
            tracing::info!(
                target: "tulsi.bazel.aspect",
                entries = extraction.entries.entry_count(),
                failures = extraction.failures.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "aspect extraction finished"
            );
        }
        result
    }

    fn build_and_collect(
        &self,
        command: &BazelCommand,
        bep_path: &Path,
        execution_root: impl FnOnce() -> PathBuf,
    ) -> Result<AspectExtraction, ExtractorError> {
        let output = self
            .runner
            .run(command)
            .map_err(|err| ExtractorError::BazelUnavailable {
                bazel: self.bazel.clone(),
                message: err.to_string(),
            })?;

        if !output.success() {
            let reason = if output.timed_out {
                "timed out".to_string()
            } else {
                match output.exit_code {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                }
            };
            return Err(self.build_failed(command, &output, reason));
        }

        let artifacts = match read_build_events(bep_path) {
            Ok(events) => events.files_with_suffix(TULSIINFO_SUFFIX),
            Err(err) => {
                tracing::warn!(
                    target: "tulsi.bazel.aspect",
                    path = %bep_path.display(),
                    error = %err,
                    "failed to read build event file"
                );
                Default::default()
            }
        };
        if artifacts.is_empty() {
            return Err(self.build_failed(command, &output, "no aspect artifacts reported".into()));
        }

        let root = artifacts
            .iter()
            .any(|path| Path::new(path).is_relative())
            .then(execution_root);
        let paths: Vec<PathBuf> = artifacts
            .into_iter()
            .map(|path| match &root {
                Some(root) => root.join(path),
                None => PathBuf::from(path),
            })
            .collect();
        Ok(collect_artifacts(&paths))
    }

    fn build_failed(
        &self,
        command: &BazelCommand,
        output: &CommandOutput,
        reason: String,
    ) -> ExtractorError {
        let rendered = command.to_string();
        tracing::error!(
            target: "tulsi.bazel.aspect",
            command = %rendered,
            exit_code = ?output.exit_code,
            %reason,
            "aspect build failed"
        );
        self.debug_info
            .push(DebugInfo::new(rendered.clone(), output.exit_code, &output.stderr));
        ExtractorError::BuildFailed {
            command: rendered,
            exit_code: output.exit_code,
            reason,
        }
    }

    /// Remove `tulsigen-*` symlinks from the workspace root. Failures are only
    /// logged; another run may already have removed them.
    fn remove_generated_symlinks(&self) {
        let dir = match fs::read_dir(&self.workspace_root) {
            Ok(dir) => dir,
            Err(err) => {
                tracing::debug!(target: "tulsi.bazel.aspect", error = %err, "cannot scan workspace for generated symlinks");
                return;
            }
        };

        for entry in dir.flatten() {
            if !entry
                .file_name()
                .to_string_lossy()
                .starts_with(ASPECT_SYMLINK_PREFIX)
            {
                continue;
            }
            let path = entry.path();
            let is_symlink = fs::symlink_metadata(&path)
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false);
            if !is_symlink {
                continue;
            }
            if let Err(err) = fs::remove_file(&path) {
                tracing::debug!(target: "tulsi.bazel.aspect", path = %path.display(), error = %err, "failed to remove generated symlink");
            }
        }
    }
}

/// Decode artifacts in parallel; insertion happens here, on the calling
/// thread, once every artifact has been attempted.
fn collect_artifacts(paths: &[PathBuf]) -> AspectExtraction {
    let decoded: Vec<_> = paths
        .par_iter()
        .map(|path| (path, parse_rule_entry_file(path)))
        .collect();

    let mut extraction = AspectExtraction::default();
    for (path, result) in decoded {
        match result {
            Ok(entry) => {
                let label = entry.label().clone();
                if !extraction.entries.insert(entry) {
                    tracing::debug!(target: "tulsi.bazel.aspect", %label, "duplicate aspect output ignored");
                }
            }
            Err(error) => {
                tracing::warn!(
                    target: "tulsi.bazel.aspect",
                    path = %path.display(),
                    %error,
                    "failed to parse aspect output"
                );
                extraction.failures.push(ArtifactFailure {
                    path: path.clone(),
                    error,
                });
            }
        }
    }

    if extraction.has_failures() {
        tracing::warn!(
            target: "tulsi.bazel.aspect",
            failed = extraction.failures.len(),
            parsed = extraction.entries.entry_count(),
            "aspect output parsing failed for some rules"
        );
    }
    extraction
}

fn unique_bep_path() -> PathBuf {
    let n = BEP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tulsi_bep_{}_{n}.json", std::process::id()))
}
