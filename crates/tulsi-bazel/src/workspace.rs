use std::path::{Path, PathBuf};

/// Walk upwards from `start` to find the Bazel workspace root.
///
/// A workspace root is identified by the presence of one of:
/// - `WORKSPACE`
/// - `WORKSPACE.bazel`
/// - `MODULE.bazel`
pub fn bazel_workspace_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    let start = start.as_ref();
    let mut dir = if start.is_file() {
        start.parent()?
    } else {
        start
    };

    loop {
        if is_bazel_workspace(dir) {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

pub fn is_bazel_workspace(root: &Path) -> bool {
    ["WORKSPACE", "WORKSPACE.bazel", "MODULE.bazel"]
        .iter()
        .any(|marker| root.join(marker).is_file())
}

/// Workspace-relative path of a source-file label (`//pkg:file` -> `pkg/file`).
///
/// External repositories live outside the workspace root and yield `None`.
pub fn workspace_path_from_label(label: &str) -> Option<PathBuf> {
    let rest = label.strip_prefix("//")?;

    if let Some((package, name)) = rest.split_once(':') {
        if package.is_empty() {
            Some(PathBuf::from(name))
        } else {
            Some(PathBuf::from(package).join(name))
        }
    } else {
        Some(PathBuf::from(rest))
    }
}
