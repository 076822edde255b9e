use std::{collections::BTreeSet, fs, io, path::Path};

use serde::Deserialize;
use serde_json::Value;

/// One event from a `--build_event_json_file` stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildEvent {
    pub id: Option<Value>,
    pub children: Vec<Value>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// `namedSetOfFiles` entries with the `file://` scheme stripped.
    pub files: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    children: Vec<Value>,
    #[serde(default)]
    progress: Option<RawProgress>,
    #[serde(default)]
    named_set_of_files: Option<RawNamedSet>,
}

#[derive(Deserialize)]
struct RawProgress {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Deserialize)]
struct RawNamedSet {
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Deserialize)]
struct RawFile {
    #[serde(default)]
    uri: Option<String>,
}

impl From<RawEvent> for BuildEvent {
    fn from(raw: RawEvent) -> Self {
        let (stdout, stderr) = raw
            .progress
            .map(|progress| (progress.stdout, progress.stderr))
            .unwrap_or_default();
        let files = raw
            .named_set_of_files
            .map(|set| {
                set.files
                    .into_iter()
                    .filter_map(|file| file.uri)
                    .filter_map(|uri| uri.strip_prefix("file://").map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        BuildEvent {
            id: raw.id,
            children: raw.children,
            stdout,
            stderr,
            files,
        }
    }
}

/// All events read from a BEP file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildEventFile {
    pub events: Vec<BuildEvent>,
    /// Non-blank lines that were not valid UTF-8 JSON objects.
    pub skipped_lines: usize,
}

impl BuildEventFile {
    /// Every referenced file path ending in `suffix`.
    pub fn files_with_suffix(&self, suffix: &str) -> BTreeSet<String> {
        self.events
            .iter()
            .flat_map(|event| event.files.iter())
            .filter(|path| path.ends_with(suffix))
            .cloned()
            .collect()
    }
}

pub fn read_build_events(path: &Path) -> io::Result<BuildEventFile> {
    let bytes = fs::read(path)?;
    Ok(parse_build_events(&bytes))
}

/// Parse newline-delimited build events. A line that fails to decode is
/// logged and skipped; it never stops the lines after it from being read.
pub fn parse_build_events(bytes: &[u8]) -> BuildEventFile {
    let mut out = BuildEventFile::default();

    for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_number = idx + 1;
        let Ok(line) = std::str::from_utf8(line) else {
            tracing::warn!(target: "tulsi.bazel.aspect", line_number, "skipping build event line that is not valid UTF-8");
            out.skipped_lines += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let decoded = serde_json::from_str::<Value>(line).and_then(|value| {
            if value.is_object() {
                RawEvent::deserialize(value)
            } else {
                Err(serde::de::Error::custom("build event is not a JSON object"))
            }
        });
        match decoded {
            Ok(raw) => out.events.push(raw.into()),
            Err(err) => {
                tracing::warn!(
                    target: "tulsi.bazel.aspect",
                    line_number,
                    error = %err,
                    "skipping malformed build event line"
                );
                out.skipped_lines += 1;
            }
        }
    }

    out
}
