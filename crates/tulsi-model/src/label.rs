use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("build label must not be empty")]
    Empty,
}

/// A Bazel build label such as `//pkg/sub:target`.
///
/// Labels are compared, ordered and hashed by their raw string; no
/// normalisation is applied, so `//pkg` and `//pkg:pkg` are distinct labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildLabel(String);

impl BuildLabel {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn parse(value: &str) -> Result<Self, LabelError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(LabelError::Empty);
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package path: everything before `:`, without the `//` (and any
    /// `@repo` prefix in front of it).
    pub fn package_name(&self) -> &str {
        let package = self.0.split(':').next().unwrap_or_default();
        match package.find("//") {
            Some(idx) => &package[idx + 2..],
            None => package,
        }
    }

    /// The component after `:`, or the last package segment when the label
    /// uses the `//pkg/sub` shorthand.
    pub fn target_name(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((_, target)) => target,
            None => self.0.rsplit('/').next().unwrap_or_default(),
        }
    }

    /// Whether the label points into an external repository (`@repo//...`).
    pub fn is_external(&self) -> bool {
        self.0.starts_with('@') && !self.0.starts_with("@//")
    }
}

impl fmt::Display for BuildLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BuildLabel {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BuildLabel {
    fn from(value: String) -> Self {
        Self(value)
    }
}
