use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to callers of the extractors.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The aspect build exited non-zero, timed out, or succeeded without
    /// producing any `.tulsiinfo` artifact.
    #[error("bazel build failed ({reason}): `{command}`")]
    BuildFailed {
        command: String,
        exit_code: Option<i32>,
        reason: String,
    },

    /// Bazel could not be launched at all.
    #[error("failed to run bazel `{}`: {message}", bazel.display())]
    BazelUnavailable { bazel: PathBuf, message: String },

    #[error("aspect output parsing failed: {0}")]
    ParsingFailed(String),

    #[error("could not split {kind} options `{value}`")]
    InvalidOptions { kind: &'static str, value: String },
}

/// Failure to decode a single aspect artifact. These never fail a batch; they
/// are logged, aggregated and the artifact is left out of the result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactParseError {
    #[error("failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has an unexpected shape: {message}")]
    InvalidField { field: String, message: String },

    #[error("Info.plist for extension {label}: {message}")]
    ExtensionPlist { label: String, message: String },
}
