use std::{
    fmt, io,
    path::{Path, PathBuf},
    time::Duration,
};

use tulsi_process::{LaunchError, ProcessSpec};

/// One Bazel (or helper tool) invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BazelCommand {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Optional deadline; `None` waits for as long as Bazel takes.
    pub timeout: Option<Duration>,
}

impl BazelCommand {
    pub fn new(cwd: &Path, program: &Path, args: Vec<String>) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            program: program.to_path_buf(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The value of a `--flag=value` argument, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let prefix = format!("{flag}=");
        self.args
            .iter()
            .find_map(|arg| arg.strip_prefix(prefix.as_str()))
    }
}

impl fmt::Display for BazelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output from a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Lines starting with `ERROR:` from stderr, then stdout.
    pub fn error_lines(&self, limit: usize) -> Vec<&str> {
        self.stderr
            .lines()
            .chain(self.stdout.lines())
            .filter(|line| line.starts_with("ERROR:"))
            .take(limit)
            .collect()
    }
}

/// Seam between the extractors and the operating system.
///
/// A runner blocks until the command has exited. Non-zero exits are returned
/// as data; `Err` is reserved for commands that could not be run at all.
pub trait CommandRunner: Send + Sync + fmt::Debug {
    fn run(&self, command: &BazelCommand) -> io::Result<CommandOutput>;
}

/// Runs commands through [`tulsi_process`].
#[derive(Debug, Default, Clone)]
pub struct DefaultCommandRunner;

impl CommandRunner for DefaultCommandRunner {
    fn run(&self, command: &BazelCommand) -> io::Result<CommandOutput> {
        let spec = ProcessSpec::new(&command.cwd, &command.program)
            .args(command.args.iter().cloned())
            .timeout(command.timeout);

        let completion = tulsi_process::run(spec).map_err(|err| match err {
            LaunchError::NotExecutable { .. } => {
                io::Error::new(io::ErrorKind::NotFound, err.to_string())
            }
            LaunchError::Spawn { source, .. } => source,
            LaunchError::Abandoned { .. } => io::Error::other(err.to_string()),
        })?;

        tracing::debug!(
            target: "tulsi.bazel",
            command = %command,
            exit_code = ?completion.exit_code(),
            launch_ms = completion.timing.launch.as_millis() as u64,
            total_ms = completion.timing.total.as_millis() as u64,
            "bazel command finished"
        );

        Ok(CommandOutput {
            exit_code: if completion.timed_out {
                None
            } else {
                completion.exit_code()
            },
            stdout: completion.stdout_lossy(),
            stderr: completion.stderr_lossy(),
            timed_out: completion.timed_out,
        })
    }
}
