use std::path::PathBuf;

use crate::{run, ProcessSpec};

const SPLITTER: &str = "python3";

// `shlex` applies POSIX quoting and escaping but never expands variables,
// substitutes commands or interprets `;`, `&` and `|`. Every word is
// NUL-terminated so empty words and embedded newlines survive.
const SPLIT_SCRIPT: &str =
    r#"import shlex, sys; sys.stdout.write("".join(w + "\0" for w in shlex.split(sys.argv[1])))"#;

/// Split a flattened, shell-style option string into an argv list.
///
/// Tokenisation is delegated to Python's `shlex` so that quoting behaves as it
/// would on a command line, while `$VAR`, `$(cmd)` and shell operators are kept
/// as literal text. Returns `Some(vec![])` for blank input without spawning
/// anything, and `None` when the tokenizer rejects the string (for example an
/// unbalanced quote) or its output cannot be decoded.
pub fn split_command_line(command_line: &str) -> Option<Vec<String>> {
    if command_line.trim().is_empty() {
        return Some(Vec::new());
    }

    let spec = ProcessSpec::new(std::env::temp_dir(), PathBuf::from(SPLITTER)).args([
        "-c",
        SPLIT_SCRIPT,
        command_line,
    ]);

    let completion = match run(spec) {
        Ok(completion) => completion,
        Err(err) => {
            tracing::warn!(target: "tulsi.process", error = %err, "failed to run command line splitter");
            return None;
        }
    };

    if !completion.success() {
        tracing::warn!(
            target: "tulsi.process",
            command_line,
            stderr = %completion.stderr_lossy(),
            "command line splitter rejected input"
        );
        return None;
    }

    let stdout = String::from_utf8(completion.stdout).ok()?;
    Some(
        stdout
            .split_terminator('\0')
            .map(str::to_owned)
            .collect(),
    )
}
