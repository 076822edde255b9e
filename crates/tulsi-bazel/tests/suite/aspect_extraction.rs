use std::{io, path::PathBuf};

use tulsi_bazel::{
    CommandOutput, ExtractionWarning, ExtractorError, ExtractorOptions, WorkspaceInfoExtractor,
    ASPECT_SYMLINK_PREFIX,
};
use tulsi_model::{BazelFileInfo, BuildLabel};

use super::support::{exit, subcommand, write_artifact, write_bep, Fixture, TestRunner};

fn labels(names: &[&str]) -> Vec<BuildLabel> {
    names.iter().copied().map(BuildLabel::new).collect()
}

/// A runner whose aspect builds succeed and report `artifacts`.
fn building(artifacts: Vec<PathBuf>) -> TestRunner {
    TestRunner::new(move |command| {
        assert_eq!(subcommand(command), Some("build"));
        write_bep(command, &artifacts);
        exit(0, "", "INFO: Build completed successfully")
    })
}

#[test]
fn resolves_a_single_application() {
    let fixture = Fixture::new();
    let artifact = write_artifact(
        fixture.outputs.path(),
        "foo",
        r#"{"label":"//pkg:foo","type":"ios_application","srcs":[{"path":"pkg/foo.m","src":true}]}"#,
    );
    let runner = building(vec![artifact]);
    let mut extractor = fixture.extractor(&runner);

    let map = extractor
        .rule_entries_for_labels(&labels(&["//pkg:foo"]), &ExtractorOptions::default())
        .unwrap();

    assert_eq!(map.len(), 1);
    let entry = map.rule_entry(&BuildLabel::new("//pkg:foo")).unwrap();
    assert_eq!(entry.rule_type(), "ios_application");
    assert_eq!(entry.source_files, vec![BazelFileInfo::source("pkg/foo.m")]);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cwd, fixture.workspace.path());
    assert_eq!(calls[0].args.last().map(String::as_str), Some("//pkg:foo"));
    assert!(calls[0].args.iter().any(|arg| arg == "--noexpand_test_suites"));
    assert!(calls[0].args.iter().any(|arg| arg == "--apple_platform_type=ios"));
    assert!(extractor.take_warnings().is_empty());
}

#[test]
fn failed_build_is_fatal_and_leaves_cache_untouched() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| exit(1, "", "ERROR: //pkg:foo: no such target\n"));
    let mut extractor = fixture.extractor(&runner);

    let err = extractor
        .rule_entries_for_labels(&labels(&["//pkg:foo"]), &ExtractorOptions::default())
        .unwrap_err();

    match err {
        ExtractorError::BuildFailed { exit_code, .. } => assert_eq!(exit_code, Some(1)),
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    assert!(extractor.rule_entry_cache().is_empty());

    let debug_info = extractor.debug_info().drain();
    assert_eq!(debug_info.len(), 1);
    assert!(debug_info[0].stderr.contains("no such target"));
    assert!(debug_info[0].command.contains(" build "));
}

#[test]
fn successful_build_without_artifacts_is_a_failure() {
    let fixture = Fixture::new();
    let runner = building(Vec::new());
    let mut extractor = fixture.extractor(&runner);

    let err = extractor
        .rule_entries_for_labels(&labels(&["//pkg:foo"]), &ExtractorOptions::default())
        .unwrap_err();

    assert!(matches!(err, ExtractorError::BuildFailed { exit_code: Some(0), .. }));
    assert!(extractor.rule_entry_cache().is_empty());
    assert_eq!(extractor.debug_info().len(), 1);
}

#[test]
fn timed_out_build_is_a_failure() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| {
        Ok(CommandOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: "INFO: Analyzed 12 targets".to_string(),
            timed_out: true,
        })
    });
    let mut extractor = fixture.extractor(&runner);

    let err = extractor
        .rule_entries_for_labels(&labels(&["//pkg:foo"]), &ExtractorOptions::default())
        .unwrap_err();

    match err {
        ExtractorError::BuildFailed { exit_code, reason, .. } => {
            assert_eq!(exit_code, None);
            assert_eq!(reason, "timed out");
        }
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    assert!(extractor.rule_entry_cache().is_empty());
    assert_eq!(extractor.debug_info().len(), 1);
}

#[test]
fn relative_artifact_paths_resolve_against_the_execution_root() {
    let fixture = Fixture::new();
    let execroot = fixture.outputs.path().to_path_buf();
    std::fs::create_dir_all(execroot.join("bazel-out/bin/pkg")).unwrap();
    write_artifact(
        &execroot.join("bazel-out/bin/pkg"),
        "foo",
        r#"{"label":"//pkg:foo","type":"objc_library"}"#,
    );
    let info = format!("execution_root: {}\n", execroot.display());
    let runner = TestRunner::new(move |command| match subcommand(command) {
        Some("build") => {
            let bep = command.flag_value("--build_event_json_file").unwrap();
            std::fs::write(
                bep,
                r#"{"namedSetOfFiles":{"files":[{"uri":"file://bazel-out/bin/pkg/foo.tulsiinfo"}]}}"#,
            )?;
            exit(0, "", "")
        }
        Some("info") => exit(0, &info, ""),
        other => panic!("unexpected subcommand {other:?}"),
    });
    let mut extractor = fixture.extractor(&runner);

    let map = extractor
        .rule_entries_for_labels(&labels(&["//pkg:foo"]), &ExtractorOptions::default())
        .unwrap();

    assert!(map.contains(&BuildLabel::new("//pkg:foo")));
    assert_eq!(runner.count("info"), 1);
}

#[test]
fn absolute_artifact_paths_skip_bazel_info() {
    let fixture = Fixture::new();
    let artifact = write_artifact(
        fixture.outputs.path(),
        "foo",
        r#"{"label":"//pkg:foo","type":"objc_library"}"#,
    );
    let runner = building(vec![artifact]);
    let mut extractor = fixture.extractor(&runner);

    extractor
        .rule_entries_for_labels(&labels(&["//pkg:foo"]), &ExtractorOptions::default())
        .unwrap();
    assert_eq!(runner.count("info"), 0);
}

#[test]
fn missing_bazel_is_reported_as_unavailable() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| Err(io::Error::new(io::ErrorKind::NotFound, "no bazel")));
    let mut extractor = fixture.extractor(&runner);

    let err = extractor
        .rule_entries_for_labels(&labels(&["//pkg:foo"]), &ExtractorOptions::default())
        .unwrap_err();
    assert!(matches!(err, ExtractorError::BazelUnavailable { .. }));
}

#[test]
fn one_bad_artifact_does_not_discard_the_rest() {
    let fixture = Fixture::new();
    let out = fixture.outputs.path();
    let artifacts = vec![
        write_artifact(out, "a", r#"{"label":"//pkg:a","type":"objc_library"}"#),
        write_artifact(out, "b", r#"{"label":"//pkg:b","type":"objc_library","deps":["//pkg:a"]}"#),
        write_artifact(out, "c", r#"{"type":"objc_library"}"#),
    ];
    let runner = building(artifacts.clone());
    let mut extractor = fixture.extractor(&runner);

    let requested = labels(&["//pkg:a", "//pkg:b", "//pkg:c"]);
    let map = extractor
        .rule_entries_for_labels(&requested, &ExtractorOptions::default())
        .unwrap();
    assert_eq!(map.len(), 2);
    assert!(map
        .rule_entry(&BuildLabel::new("//pkg:b"))
        .unwrap()
        .dependencies
        .contains(&BuildLabel::new("//pkg:a")));

    let warnings = extractor.take_warnings();
    let parse_failures: Vec<_> = warnings
        .iter()
        .filter_map(|warning| match warning {
            ExtractionWarning::AspectParseFailures { paths } => Some(paths),
            _ => None,
        })
        .collect();
    assert_eq!(parse_failures.len(), 1);
    assert_eq!(parse_failures[0], &vec![artifacts[2].clone()]);
    assert!(warnings.contains(&ExtractionWarning::UnresolvedLabels(labels(&["//pkg:c"]))));
}

#[test]
fn extension_without_plist_fails_alone() {
    let fixture = Fixture::new();
    let out = fixture.outputs.path();
    let artifacts = vec![
        write_artifact(
            out,
            "App",
            r#"{"label":"//app:App","type":"ios_application","extensions":["//app:Share"]}"#,
        ),
        write_artifact(
            out,
            "Share",
            r#"{"label":"//app:Share","type":"ios_extension","infoplist":"bazel-out/ios/bin/app/Share.plist"}"#,
        ),
    ];
    let runner = building(artifacts);
    let mut extractor = fixture.extractor(&runner);

    let map = extractor
        .rule_entries_for_labels(&labels(&["//app:App"]), &ExtractorOptions::default())
        .unwrap();

    assert!(map.contains(&BuildLabel::new("//app:App")));
    assert!(!map.contains(&BuildLabel::new("//app:Share")));
    assert!(matches!(
        extractor.take_warnings().as_slice(),
        [ExtractionWarning::AspectParseFailures { paths }] if paths.len() == 1
    ));
}

#[test]
fn options_are_split_into_argv() {
    let fixture = Fixture::new();
    let artifact = write_artifact(
        fixture.outputs.path(),
        "a",
        r#"{"label":"//pkg:a","type":"objc_library"}"#,
    );
    let runner = building(vec![artifact]);
    let config = fixture
        .config()
        .with_startup_options("--output_user_root='/tmp/with space'")
        .unwrap();
    let mut extractor = WorkspaceInfoExtractor::new(config, runner.clone());

    let options = ExtractorOptions {
        build: "--config=ci --define \"NAME=a b\"".to_string(),
        project_generation: String::new(),
    };
    extractor
        .rule_entries_for_labels(&labels(&["//pkg:a"]), &options)
        .unwrap();

    let args = &runner.calls()[0].args;
    assert_eq!(args[0], "--output_user_root=/tmp/with space");
    assert_eq!(args[1], "build");
    let tail: Vec<&str> = args[args.len() - 4..].iter().map(String::as_str).collect();
    assert_eq!(tail, vec!["--config=ci", "--define", "NAME=a b", "//pkg:a"]);
}

#[test]
fn unbalanced_options_are_rejected_before_running_bazel() {
    let fixture = Fixture::new();
    let runner = building(Vec::new());
    let mut extractor = fixture.extractor(&runner);

    let options = ExtractorOptions {
        build: "--define 'oops".to_string(),
        ..Default::default()
    };
    let err = extractor
        .rule_entries_for_labels(&labels(&["//pkg:a"]), &options)
        .unwrap_err();

    assert!(matches!(err, ExtractorError::InvalidOptions { kind: "build", .. }));
    assert_eq!(runner.call_count(), 0);
}

#[cfg(unix)]
#[test]
fn generated_symlinks_are_removed_after_every_build() {
    let fixture = Fixture::new();
    let root = fixture.workspace.path().to_path_buf();
    let runner = TestRunner::new(move |_| {
        std::os::unix::fs::symlink("/tmp", root.join(format!("{ASPECT_SYMLINK_PREFIX}bin")))?;
        exit(1, "", "ERROR: boom")
    });
    std::os::unix::fs::symlink("/tmp", fixture.workspace.path().join("bazel-bin")).unwrap();
    let mut extractor = fixture.extractor(&runner);

    let result =
        extractor.rule_entries_for_labels(&labels(&["//pkg:a"]), &ExtractorOptions::default());

    assert!(result.is_err());
    assert!(std::fs::symlink_metadata(fixture.workspace.path().join("tulsigen-bin")).is_err());
    assert!(std::fs::symlink_metadata(fixture.workspace.path().join("bazel-bin")).is_ok());
}
