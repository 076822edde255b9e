use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tulsi_bazel::{
    BazelCommand, CommandOutput, CommandRunner, ExtractorConfig, WorkspaceInfoExtractor,
};

type Responder = dyn Fn(&BazelCommand) -> io::Result<CommandOutput> + Send + Sync;

/// Records every invocation and answers with a scripted response.
#[derive(Clone)]
pub struct TestRunner {
    calls: Arc<Mutex<Vec<BazelCommand>>>,
    respond: Arc<Responder>,
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRunner")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl TestRunner {
    pub fn new(
        respond: impl Fn(&BazelCommand) -> io::Result<CommandOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            respond: Arc::new(respond),
        }
    }

    pub fn calls(&self) -> Vec<BazelCommand> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls mutex poisoned").len()
    }

    /// Invocations whose Bazel subcommand is `subcommand`.
    pub fn count(&self, subcommand: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| self::subcommand(call) == Some(subcommand))
            .count()
    }
}

impl CommandRunner for TestRunner {
    fn run(&self, command: &BazelCommand) -> io::Result<CommandOutput> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(command.clone());
        (self.respond)(command)
    }
}

/// First argument that is not a startup option.
pub fn subcommand(command: &BazelCommand) -> Option<&str> {
    command
        .args
        .iter()
        .map(String::as_str)
        .find(|arg| !arg.starts_with("--"))
}

pub fn exit(code: i32, stdout: &str, stderr: &str) -> io::Result<CommandOutput> {
    Ok(CommandOutput {
        exit_code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        timed_out: false,
    })
}

/// Write the BEP file named on an aspect build's command line, listing
/// `artifacts` plus some noise the reader must skip.
pub fn write_bep(command: &BazelCommand, artifacts: &[PathBuf]) {
    let path = command
        .flag_value("--build_event_json_file")
        .expect("aspect build without --build_event_json_file");

    let mut lines = vec![r#"{"started":{"uuid":"test","command":"build"}}"#.to_string()];
    for artifact in artifacts {
        lines.push(format!(
            r#"{{"id":{{"namedSet":{{"id":"0"}}}},"namedSetOfFiles":{{"files":[{{"name":"out","uri":"file://{}"}},{{"uri":"file:///out/libfoo.a"}}]}}}}"#,
            artifact.display()
        ));
        lines.push("{truncated".to_string());
    }
    std::fs::write(path, lines.join("\n")).expect("write BEP file");
}

pub fn write_artifact(dir: &Path, name: &str, json: &str) -> PathBuf {
    let path = dir.join(format!("{name}.tulsiinfo"));
    std::fs::write(&path, json).expect("write artifact");
    path
}

/// A workspace directory plus a scratch directory for aspect outputs.
pub struct Fixture {
    pub workspace: tempfile::TempDir,
    pub outputs: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let workspace = tempfile::tempdir().expect("workspace tempdir");
        std::fs::write(workspace.path().join("WORKSPACE"), "").expect("write WORKSPACE");
        Self {
            workspace,
            outputs: tempfile::tempdir().expect("outputs tempdir"),
        }
    }

    pub fn config(&self) -> ExtractorConfig {
        ExtractorConfig::new(
            "bazel",
            self.workspace.path(),
            "/opt/tulsi/aspects",
        )
    }

    pub fn extractor(&self, runner: &TestRunner) -> WorkspaceInfoExtractor<TestRunner> {
        WorkspaceInfoExtractor::new(self.config(), runner.clone())
    }
}
