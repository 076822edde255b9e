use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// A checked-in input, relative to the workspace root.
    Source,
    /// A build output, relative to an output root such as `bazel-out/...`.
    Generated,
}

/// A single file referenced by a rule, either a source input or a generated
/// output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BazelFileInfo {
    pub kind: FileKind,
    /// Root the `sub_path` is relative to. Empty for workspace-relative files.
    pub root_path: String,
    pub sub_path: String,
    #[serde(default)]
    pub is_directory: bool,
}

impl BazelFileInfo {
    pub fn source(sub_path: impl Into<String>) -> Self {
        Self {
            kind: FileKind::Source,
            root_path: String::new(),
            sub_path: sub_path.into(),
            is_directory: false,
        }
    }

    pub fn generated(root_path: impl Into<String>, sub_path: impl Into<String>) -> Self {
        Self {
            kind: FileKind::Generated,
            root_path: root_path.into(),
            sub_path: sub_path.into(),
            is_directory: false,
        }
    }

    pub fn is_generated(&self) -> bool {
        self.kind == FileKind::Generated
    }

    pub fn full_path(&self) -> String {
        if self.root_path.is_empty() {
            self.sub_path.clone()
        } else if self.sub_path.is_empty() {
            self.root_path.clone()
        } else {
            format!(
                "{}/{}",
                self.root_path.trim_end_matches('/'),
                self.sub_path.trim_start_matches('/')
            )
        }
    }
}
