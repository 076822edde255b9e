use std::{sync::Arc, thread};

use tulsi_bazel::WorkspacePathInfoFetcher;

use super::support::{exit, subcommand, Fixture, TestRunner};

const INFO: &str = "bazel-bin: /out/execroot/ws/bazel-out/ios-fastbuild/bin
bazel-testlogs: /out/execroot/ws/bazel-out/ios-fastbuild/testlogs
execution_root: /out/execroot/ws
output_base: /out
";

#[test]
fn bazel_info_runs_once_for_concurrent_readers() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|command| {
        assert_eq!(subcommand(command), Some("info"));
        exit(0, INFO, "")
    });
    let fetcher = Arc::new(WorkspacePathInfoFetcher::new(
        Arc::new(runner.clone()),
        "bazel",
        fixture.workspace.path(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fetcher = Arc::clone(&fetcher);
            thread::spawn(move || fetcher.execution_root().to_string())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), "/out/execroot/ws");
    }

    assert_eq!(fetcher.output_base(), "/out");
    assert_eq!(fetcher.bazel_bin_symlink_name(), "bazel-bin");
    assert_eq!(runner.call_count(), 1);
}

#[test]
fn failed_info_yields_empty_values() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| exit(2, "", "ERROR: server crashed"));
    let extractor = fixture.extractor(&runner);

    assert_eq!(extractor.execution_root(), "");
    assert_eq!(extractor.output_base(), "");
    assert_eq!(runner.call_count(), 1);
}

#[test]
fn missing_bazel_binary_never_spawns() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| exit(0, INFO, ""));
    let fetcher = WorkspacePathInfoFetcher::new(
        Arc::new(runner.clone()),
        fixture.workspace.path().join("tools/bazel"),
        fixture.workspace.path(),
    );

    assert_eq!(fetcher.execution_root(), "");
    assert_eq!(runner.call_count(), 0);
}
