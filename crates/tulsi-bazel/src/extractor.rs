use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tulsi_model::{BazelFlagsSet, BuildLabel, PlatformConfiguration, RuleEntryMap, RuleInfo};

use crate::{
    aspect::{AspectExtractor, AspectOptions},
    command::{CommandRunner, DefaultCommandRunner},
    debug_info::DebugInfoQueue,
    error::ExtractorError,
    info::{WorkspaceInfo, WorkspacePathInfoFetcher},
    query::QueryExtractor,
    settings::{BazelSettingsProvider, UserBuildOptions},
};

/// How rule entries are resolved. Fixed when the extractor is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// One `bazel build` with the Tulsi aspect attached.
    #[default]
    Aspect,
    /// Per-label `bazel query`; no build required, less detail.
    Query,
}

/// How `test_suite` labels are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSuiteStrategy {
    /// Build with `--noexpand_test_suites` and trust the aspect.
    #[default]
    Aspect,
    /// Let Bazel expand suites, then query for suites the build left
    /// unresolved. Each label is re-queried at most once.
    QueryFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub bazel: PathBuf,
    pub workspace_root: PathBuf,
    /// Local checkout overriding the `@tulsi` repository that holds the aspect.
    pub aspect_workspace: PathBuf,
    pub strategy: ExtractionStrategy,
    pub test_suites: TestSuiteStrategy,
    pub platform: PlatformConfiguration,
    /// Deadline for every Bazel subprocess; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Startup options in argv form. Every Bazel invocation (`build`, `query`,
    /// `info`) is prefixed with them so all talk to the same server and
    /// output base.
    pub startup: Vec<String>,
}

impl ExtractorConfig {
    pub fn new(
        bazel: impl Into<PathBuf>,
        workspace_root: impl Into<PathBuf>,
        aspect_workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bazel: bazel.into(),
            workspace_root: workspace_root.into(),
            aspect_workspace: aspect_workspace.into(),
            strategy: ExtractionStrategy::default(),
            test_suites: TestSuiteStrategy::default(),
            platform: PlatformConfiguration::default(),
            timeout: None,
            startup: Vec::new(),
        }
    }

    /// Set the startup options from a flattened, shell-quoted string.
    pub fn with_startup_options(mut self, startup: &str) -> Result<Self, ExtractorError> {
        self.startup = split_option("startup", startup)?;
        Ok(self)
    }
}

/// Per-request option strings, flattened and shell-quoted as users type them.
///
/// Startup options are fixed for the extractor's lifetime and live in
/// [`ExtractorConfig::startup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub build: String,
    pub project_generation: String,
}

impl ExtractorOptions {
    fn split(&self) -> Result<(Vec<String>, Vec<String>), ExtractorError> {
        Ok((
            split_option("build", &self.build)?,
            split_option("project generation", &self.project_generation)?,
        ))
    }
}

fn split_option(kind: &'static str, value: &str) -> Result<Vec<String>, ExtractorError> {
    tulsi_process::split_command_line(value).ok_or_else(|| ExtractorError::InvalidOptions {
        kind,
        value: value.to_string(),
    })
}

/// Non-fatal problems recorded during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionWarning {
    /// Some aspect artifacts could not be decoded; their rules are missing.
    AspectParseFailures { paths: Vec<PathBuf> },
    /// Requested labels that no strategy could resolve.
    UnresolvedLabels(Vec<BuildLabel>),
}

/// The interface project generation talks to.
///
/// Owns the rule-entry cache for a generation session. Only labels missing
/// from the cache trigger Bazel work, and they are resolved in one batch.
#[derive(Debug)]
pub struct WorkspaceInfoExtractor<R: CommandRunner> {
    config: ExtractorConfig,
    aspect: AspectExtractor<R>,
    query: QueryExtractor<R>,
    paths: WorkspacePathInfoFetcher<R>,
    settings: BazelSettingsProvider,
    debug_info: Arc<DebugInfoQueue>,
    cache: RuleEntryMap,
    test_suite_attempted: BTreeSet<BuildLabel>,
    warnings: Vec<ExtractionWarning>,
}

impl WorkspaceInfoExtractor<DefaultCommandRunner> {
    pub fn with_default_runner(config: ExtractorConfig) -> Self {
        Self::new(config, DefaultCommandRunner)
    }
}

impl<R: CommandRunner> WorkspaceInfoExtractor<R> {
    pub fn new(config: ExtractorConfig, runner: R) -> Self {
        let runner = Arc::new(runner);
        let debug_info = Arc::new(DebugInfoQueue::new());

        let aspect = AspectExtractor::new(
            Arc::clone(&runner),
            &config.bazel,
            &config.workspace_root,
            &config.aspect_workspace,
            Arc::clone(&debug_info),
        )
        .with_timeout(config.timeout);
        let query = QueryExtractor::new(Arc::clone(&runner), &config.bazel, &config.workspace_root)
            .with_startup_options(config.startup.clone())
            .with_timeout(config.timeout);
        let paths = WorkspacePathInfoFetcher::new(runner, &config.bazel, &config.workspace_root)
            .with_startup_options(config.startup.clone())
            .with_timeout(config.timeout);

        tracing::debug!(
            target: "tulsi.bazel.extractor",
            strategy = ?config.strategy,
            test_suites = ?config.test_suites,
            workspace = %config.workspace_root.display(),
            "workspace info extractor created"
        );

        Self {
            settings: BazelSettingsProvider::new(config.platform),
            config,
            aspect,
            query,
            paths,
            debug_info,
            cache: RuleEntryMap::new(),
            test_suite_attempted: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Resolve `labels`, returning the whole accumulated cache.
    ///
    /// Labels already cached cost nothing; the rest are resolved with a single
    /// Bazel invocation. A failed build leaves the cache untouched.
    pub fn rule_entries_for_labels(
        &mut self,
        labels: &[BuildLabel],
        options: &ExtractorOptions,
    ) -> Result<&RuleEntryMap, ExtractorError> {
        let missing: Vec<BuildLabel> = labels
            .iter()
            .filter(|label| !self.cache.contains(label))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            tracing::debug!(target: "tulsi.bazel.extractor", requested = labels.len(), "all labels cached");
            return Ok(&self.cache);
        }

        // Validated under every strategy, before any Bazel work.
        let (build, project_generation) = options.split()?;

        let resolved = match self.config.strategy {
            ExtractionStrategy::Aspect => {
                let mut platform_build = self.config.platform.bazel_flags().build;
                platform_build.extend(build);
                let aspect_options = AspectOptions {
                    startup: self.config.startup.clone(),
                    build: platform_build,
                    project_generation,
                    no_expand_test_suites: self.config.test_suites == TestSuiteStrategy::Aspect,
                };

                let paths = &self.paths;
                let workspace_root = &self.config.workspace_root;
                let execution_root = || match paths.execution_root() {
                    "" => workspace_root.clone(),
                    root => PathBuf::from(root),
                };
                let extraction = self.aspect.extract(&missing, &aspect_options, execution_root)?;
                if extraction.has_failures() {
                    self.warnings.push(ExtractionWarning::AspectParseFailures {
                        paths: extraction.failures.iter().map(|f| f.path.clone()).collect(),
                    });
                }
                extraction.entries
            }
            ExtractionStrategy::Query => self.query.extract_rule_entries(&missing),
        };
        self.cache.merge(resolved);

        if self.config.test_suites == TestSuiteStrategy::QueryFallback {
            self.expand_unresolved_test_suites(&missing);
        }

        let unresolved: Vec<BuildLabel> = missing
            .into_iter()
            .filter(|label| !self.cache.contains(label))
            .collect();
        if !unresolved.is_empty() {
            tracing::warn!(
                target: "tulsi.bazel.extractor",
                count = unresolved.len(),
                labels = ?unresolved,
                "some labels could not be resolved"
            );
            self.warnings.push(ExtractionWarning::UnresolvedLabels(unresolved));
        }

        Ok(&self.cache)
    }

    /// Query for `test_suite` rules among `requested` labels the build left
    /// unresolved. A label is never queried twice.
    fn expand_unresolved_test_suites(&mut self, requested: &[BuildLabel]) {
        let pending: Vec<BuildLabel> = requested
            .iter()
            .filter(|label| !self.cache.contains(label))
            .filter(|label| self.test_suite_attempted.insert((*label).clone()))
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }

        tracing::info!(
            target: "tulsi.bazel.extractor",
            count = pending.len(),
            "querying for test_suite rules missing from the aspect output"
        );
        let suites = self.query.extract_test_suite_rules(&pending);
        self.cache.merge(suites);
    }

    pub fn extract_rule_info_from_packages(&self, packages: &[String]) -> Vec<RuleInfo> {
        self.query.extract_target_rules_from_packages(packages)
    }

    pub fn extract_buildfiles(&self, labels: &[BuildLabel]) -> Vec<BuildLabel> {
        self.query.extract_buildfiles(labels)
    }

    pub fn rule_entry_cache(&self) -> &RuleEntryMap {
        &self.cache
    }

    pub fn workspace_root(&self) -> &Path {
        &self.config.workspace_root
    }

    pub fn workspace_info(&self) -> &WorkspaceInfo {
        self.paths.info()
    }

    pub fn execution_root(&self) -> &str {
        self.paths.execution_root()
    }

    pub fn output_base(&self) -> &str {
        self.paths.output_base()
    }

    pub fn bazel_bin_symlink_name(&self) -> &str {
        self.paths.bazel_bin_symlink_name()
    }

    pub fn settings(&self) -> &BazelSettingsProvider {
        &self.settings
    }

    /// Flags the generated project should build with, per compilation mode.
    pub fn build_flags(&self, options: &UserBuildOptions) -> BazelFlagsSet {
        self.settings.flags_set(options)
    }

    pub fn debug_info(&self) -> &Arc<DebugInfoQueue> {
        &self.debug_info
    }

    pub fn take_warnings(&mut self) -> Vec<ExtractionWarning> {
        std::mem::take(&mut self.warnings)
    }
}
