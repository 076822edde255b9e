use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Once},
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{
        writer::{BoxMakeWriter, MakeWriterExt},
        MakeWriter,
    },
    prelude::*,
};
use tulsi_bazel::{
    ExtractionStrategy, ExtractorConfig, ExtractorOptions, TestSuiteStrategy, UserBuildOptions,
};
use tulsi_model::{CpuArch, PlatformConfiguration, PlatformType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` includes a source snippet; keep just the message.
        ConfigError::Toml(err.message().to_string())
    }
}

/// Generator settings, usually read from `tulsi.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Bazel binary; bare names are looked up on `PATH`.
    pub bazel: PathBuf,
    /// Local checkout of the repository providing `@tulsi//tulsi:tulsi_aspects.bzl`.
    pub aspect_workspace: Option<PathBuf>,
    pub extraction: ExtractionStrategy,
    pub test_suites: TestSuiteStrategy,
    /// Deadline for each Bazel subprocess. Absent or `0` means no deadline.
    pub timeout_ms: Option<u64>,
    pub platform: PlatformType,
    pub cpu: CpuArch,
    pub options: OptionsConfig,
    pub logging: LoggingConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let platform = PlatformConfiguration::default();
        Self {
            bazel: PathBuf::from("bazel"),
            aspect_workspace: None,
            extraction: ExtractionStrategy::default(),
            test_suites: TestSuiteStrategy::default(),
            timeout_ms: None,
            platform: platform.platform,
            cpu: platform.cpu,
            options: OptionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Bazel options as users write them: one shell-quoted string each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub startup: String,
    pub build: String,
    pub project_generation: String,
    pub debug_build: String,
    pub release_build: String,
}

impl OptionsConfig {
    pub fn extractor_options(&self) -> ExtractorOptions {
        ExtractorOptions {
            build: self.build.clone(),
            project_generation: self.project_generation.clone(),
        }
    }

    pub fn user_build_options(&self) -> Result<UserBuildOptions, ConfigError> {
        let split = |key: &str, value: &str| {
            tulsi_process::split_command_line(value).ok_or_else(|| {
                ConfigError::Invalid(format!("options.{key} is not a valid shell argument list"))
            })
        };
        Ok(UserBuildOptions {
            startup: split("startup", &self.startup)?,
            build: split("build", &self.build)?,
            debug_build: split("debug_build", &self.debug_build)?,
            release_build: split("release_build", &self.release_build)?,
        })
    }
}

impl GeneratorConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_from_path_with_diagnostics(path).map(|(config, _)| config)
    }

    /// Load a config file from TOML, also returning the dotted paths of keys
    /// that were not recognised.
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<String>), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_with_diagnostics(&text)
    }

    pub fn parse_with_diagnostics(text: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut unknown = Vec::new();
        let config: GeneratorConfig =
            serde_ignored::deserialize(toml::Deserializer::new(text), |path| {
                unknown.push(path.to_string())
            })?;
        Ok((config, unknown))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn platform_configuration(&self) -> PlatformConfiguration {
        PlatformConfiguration::new(self.platform, self.cpu)
    }

    pub fn extractor_config(&self, workspace_root: &Path) -> Result<ExtractorConfig, ConfigError> {
        let aspect_workspace = match (&self.aspect_workspace, self.extraction) {
            (Some(path), _) => path.clone(),
            (None, ExtractionStrategy::Query) => PathBuf::new(),
            (None, ExtractionStrategy::Aspect) => {
                return Err(ConfigError::Invalid(
                    "aspect_workspace is required for aspect extraction".to_string(),
                ))
            }
        };

        let mut config = ExtractorConfig::new(&self.bazel, workspace_root, aspect_workspace)
            .with_startup_options(&self.options.startup)
            .map_err(|_| {
                ConfigError::Invalid("options.startup is not a valid shell argument list".into())
            })?;
        config.strategy = self.extraction;
        config.test_suites = self.test_suites;
        config.platform = self.platform_configuration();
        config.timeout = self.timeout();
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file. If it cannot be opened, file logging is
    /// skipped and the other sinks stay active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level with `RUST_LOG` merged in.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let combined = format!(
                    "{},{env_directives}",
                    Self::normalize_level_directives(&self.level)
                );
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

struct SharedFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for SharedFileMakeWriter {
    type Writer = SharedFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriter {
            guard: self.file.lock(),
        }
    }
}

struct SharedFileWriter<'a> {
    guard: parking_lot::MutexGuard<'a, std::fs::File>,
}

impl Write for SharedFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = config.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            // Keeps `cargo test` output capture working in debug builds.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(SharedFileMakeWriter {
                file: Arc::new(Mutex::new(file)),
            }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "tulsi.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}
