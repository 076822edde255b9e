//! Supervised external processes.
//!
//! Bazel invocations can run for minutes and produce a lot of output on both
//! streams. Every launch here is supervised by a dedicated thread that drains
//! stdout/stderr while waiting for the child, so the completion is reported
//! exactly once and only after the process has exited *and* both streams have
//! been fully read.
//!
//! Completion is handed back either through a [`ProcessHandle`] (a single
//! blocking [`ProcessHandle::wait`]) or through a callback that runs on the
//! supervisor thread, never on the caller's thread.

mod splitter;

pub use splitter::split_command_line;

use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;

/// A full process invocation: working directory, program, arguments and an
/// environment overlay applied on top of the inherited environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Kill the process tree if it hasn't exited after this duration.
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(cwd: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Human-readable, not a round-trippable shell snippet.
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Wall-clock measurements for one process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessTiming {
    /// Time between the launch request and the child actually running.
    pub launch: Duration,
    /// Time between the launch request and the completion being reported.
    pub total: Duration,
}

/// Everything captured from a finished process.
///
/// A non-zero exit is reported here, not as an error: callers decide what a
/// failure means for them.
#[derive(Debug, Clone)]
pub struct ProcessCompletion {
    pub command: ProcessSpec,
    pub pid: u32,
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub timing: ProcessTiming,
}

impl ProcessCompletion {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Exit code, or `None` when the process was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("`{}` is not an executable file", program.display())]
    NotExecutable { program: PathBuf },

    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("supervisor for `{command}` exited without reporting a completion")]
    Abandoned { command: String },
}

/// A launched process whose completion has not been collected yet.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    command: String,
    completion: crossbeam_channel::Receiver<ProcessCompletion>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the process has exited and its output has been drained.
    pub fn wait(self) -> Result<ProcessCompletion, LaunchError> {
        self.completion.recv().map_err(|_| LaunchError::Abandoned {
            command: self.command,
        })
    }
}

fn live_set() -> &'static Mutex<BTreeMap<u32, String>> {
    static LIVE: OnceLock<Mutex<BTreeMap<u32, String>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(BTreeMap::new()))
}

/// Processes launched by this module that have not completed yet, as
/// `(pid, command line)` pairs.
pub fn live_processes() -> Vec<(u32, String)> {
    live_set()
        .lock()
        .iter()
        .map(|(pid, command)| (*pid, command.clone()))
        .collect()
}

/// Launch a process and return a handle resolving to its completion.
pub fn launch(spec: ProcessSpec) -> Result<ProcessHandle, LaunchError> {
    let command = spec.to_string();
    let (tx, rx) = crossbeam_channel::bounded(1);
    let pid = launch_with_completion(spec, move |completion| {
        // The receiver may already be gone if the handle was dropped.
        let _ = tx.send(completion);
    })?;
    Ok(ProcessHandle {
        pid,
        command,
        completion: rx,
    })
}

/// Launch a process and block until it completes.
pub fn run(spec: ProcessSpec) -> Result<ProcessCompletion, LaunchError> {
    launch(spec)?.wait()
}

/// Launch a process and invoke `on_complete` exactly once, from the supervisor
/// thread, after the process exited and all output was read.
///
/// Launch failures (missing binary, spawn errors) are reported synchronously and
/// `on_complete` is never called in that case.
pub fn launch_with_completion<F>(spec: ProcessSpec, on_complete: F) -> Result<u32, LaunchError>
where
    F: FnOnce(ProcessCompletion) + Send + 'static,
{
    ensure_executable(&spec.program)?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so a timeout can take down the whole tree (Bazel's
    // client spawns a server that would otherwise keep our pipes open).
    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and does not allocate.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let requested = Instant::now();
    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        command: spec.to_string(),
        source,
    })?;
    let launch_latency = requested.elapsed();
    let pid = child.id();

    live_set().lock().insert(pid, spec.to_string());
    tracing::debug!(target: "tulsi.process", pid, command = %spec, "launched process");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let supervisor = thread::Builder::new()
        .name(format!("tulsi-process-{pid}"))
        .spawn(move || {
            let completion = supervise(child, spec, stdout, stderr, requested, launch_latency);
            live_set().lock().remove(&completion.pid);
            tracing::debug!(
                target: "tulsi.process",
                pid = completion.pid,
                status = %completion.status,
                launch_ms = completion.timing.launch.as_millis() as u64,
                total_ms = completion.timing.total.as_millis() as u64,
                "process completed"
            );
            on_complete(completion);
        });

    if let Err(source) = supervisor {
        live_set().lock().remove(&pid);
        return Err(LaunchError::Spawn {
            command: format!("supervisor for pid {pid}"),
            source,
        });
    }

    Ok(pid)
}

fn ensure_executable(program: &Path) -> Result<(), LaunchError> {
    // Bare names are resolved through PATH by the OS at spawn time.
    if program.components().count() <= 1 {
        return Ok(());
    }

    let not_executable = || LaunchError::NotExecutable {
        program: program.to_path_buf(),
    };
    let metadata = std::fs::metadata(program).map_err(|_| not_executable())?;
    if !metadata.is_file() {
        return Err(not_executable());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(not_executable());
        }
    }

    Ok(())
}

fn supervise(
    mut child: Child,
    spec: ProcessSpec,
    stdout: Option<impl Read + Send + 'static>,
    stderr: Option<impl Read + Send + 'static>,
    requested: Instant,
    launch_latency: Duration,
) -> ProcessCompletion {
    let pid = child.id();
    let stdout_reader = stdout.map(|stream| thread::spawn(move || read_all(stream)));
    let stderr_reader = stderr.map(|stream| thread::spawn(move || read_all(stream)));

    let mut timed_out = false;
    let status = match spec.timeout {
        None => child.wait(),
        Some(timeout) => loop {
            match child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => {}
                Err(err) => break Err(err),
            }
            if requested.elapsed() >= timeout {
                timed_out = true;
                tracing::warn!(
                    target: "tulsi.process",
                    pid,
                    timeout_ms = timeout.as_millis() as u64,
                    command = %spec,
                    "process exceeded its deadline; terminating"
                );
                break terminate_process_tree(&mut child, Duration::from_millis(250));
            }
            thread::sleep(
                Duration::from_millis(50).min(timeout.saturating_sub(requested.elapsed())),
            );
        },
    };

    let status = status.unwrap_or_else(|err| {
        tracing::error!(target: "tulsi.process", pid, error = %err, "failed to wait for process");
        failed_status()
    });

    let stdout = join_reader(stdout_reader, "stdout", pid);
    let stderr = join_reader(stderr_reader, "stderr", pid);

    ProcessCompletion {
        command: spec,
        pid,
        status,
        stdout,
        stderr,
        timed_out,
        timing: ProcessTiming {
            launch: launch_latency,
            total: requested.elapsed(),
        },
    }
}

#[cfg(unix)]
fn failed_status() -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(1 << 8)
}

#[cfg(windows)]
fn failed_status() -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(1)
}

fn read_all(mut reader: impl Read) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

fn join_reader(
    handle: Option<thread::JoinHandle<io::Result<Vec<u8>>>>,
    stream: &'static str,
    pid: u32,
) -> Vec<u8> {
    let Some(handle) = handle else {
        return Vec::new();
    };
    match handle.join() {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            tracing::warn!(target: "tulsi.process", pid, stream, error = %err, "failed to read process output");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(target: "tulsi.process", pid, stream, "output reader thread panicked");
            Vec::new()
        }
    }
}

fn terminate_process_tree(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // Negative pid targets the process group created in `pre_exec`.
        unsafe {
            let _ = libc::kill(-pid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }

        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}
