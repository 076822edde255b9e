use std::collections::VecDeque;

use parking_lot::Mutex;

/// Trailing bytes of stderr kept per failure. Bazel prints the interesting
/// part (the actual error) last.
const STDERR_BUDGET: usize = 8 * 1024;

/// Details of a failed Bazel invocation, kept for a report at the end of the
/// run rather than printed mid-generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl DebugInfo {
    pub fn new(command: impl Into<String>, exit_code: Option<i32>, stderr: &str) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stderr: truncate_front(stderr, STDERR_BUDGET),
        }
    }
}

#[derive(Debug, Default)]
pub struct DebugInfoQueue {
    queue: Mutex<VecDeque<DebugInfo>>,
}

impl DebugInfoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, info: DebugInfo) {
        self.queue.lock().push_back(info);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Remove and return everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<DebugInfo> {
        self.queue.lock().drain(..).collect()
    }

    /// Drain the queue into the log.
    pub fn flush_to_log(&self) {
        for info in self.drain() {
            tracing::error!(
                target: "tulsi.bazel",
                command = %info.command,
                exit_code = ?info.exit_code,
                "bazel invocation failed:\n{}",
                info.stderr
            );
        }
    }
}

fn truncate_front(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut start = text.len() - budget;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... truncated ...]\n{}", &text[start..])
}
