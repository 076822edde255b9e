use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tulsi_bazel::{
    ExtractionStrategy, ExtractionWarning, ExtractorError, ExtractorOptions, TestSuiteStrategy,
    WorkspaceInfoExtractor, MAX_CONCURRENT_QUERIES,
};
use tulsi_model::BuildLabel;

use super::support::{exit, subcommand, write_artifact, write_bep, Fixture, TestRunner};

fn label(name: &str) -> BuildLabel {
    BuildLabel::new(name)
}

#[test]
fn cached_labels_do_not_rebuild() {
    let fixture = Fixture::new();
    let out = fixture.outputs.path();
    let artifacts = vec![
        write_artifact(out, "A", r#"{"label":"//pkg:A","type":"objc_library"}"#),
        write_artifact(out, "B", r#"{"label":"//pkg:B","type":"objc_library"}"#),
    ];
    let runner = TestRunner::new(move |command| {
        write_bep(command, &artifacts);
        exit(0, "", "")
    });
    let mut extractor = fixture.extractor(&runner);
    let options = ExtractorOptions::default();

    extractor
        .rule_entries_for_labels(&[label("//pkg:A"), label("//pkg:B")], &options)
        .unwrap();
    let map = extractor
        .rule_entries_for_labels(&[label("//pkg:A")], &options)
        .unwrap();

    assert_eq!(map.len(), 2);
    assert_eq!(runner.count("build"), 1);
}

#[test]
fn missing_labels_are_built_in_one_batch() {
    let fixture = Fixture::new();
    let out = fixture.outputs.path();
    let artifacts = vec![
        write_artifact(out, "A", r#"{"label":"//pkg:A","type":"objc_library"}"#),
        write_artifact(out, "B", r#"{"label":"//pkg:B","type":"objc_library"}"#),
        write_artifact(out, "C", r#"{"label":"//pkg:C","type":"objc_library"}"#),
    ];
    let runner = TestRunner::new(move |command| {
        write_bep(command, &artifacts);
        exit(0, "", "")
    });
    let mut extractor = fixture.extractor(&runner);
    let options = ExtractorOptions::default();

    extractor
        .rule_entries_for_labels(&[label("//pkg:A")], &options)
        .unwrap();
    extractor
        .rule_entries_for_labels(
            &[label("//pkg:A"), label("//pkg:C"), label("//pkg:B"), label("//pkg:C")],
            &options,
        )
        .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    let targets: Vec<&str> = calls[1]
        .args
        .iter()
        .filter(|arg| arg.starts_with("//"))
        .map(String::as_str)
        .collect();
    assert_eq!(targets, vec!["//pkg:B", "//pkg:C"]);
}

#[test]
fn query_fallback_expands_test_suites_once() {
    let fixture = Fixture::new();
    let out = fixture.outputs.path();
    let app = write_artifact(out, "App", r#"{"label":"//app:App","type":"ios_application"}"#);

    let suite_xml = r#"<?xml version="1.1" encoding="UTF-8" standalone="no"?>
<query version="2">
  <rule class="test_suite" name="//app:AllTests">
    <rule-input name="//app:UnitTests"/>
    <rule-input name="//app:UITests"/>
  </rule>
</query>"#;

    let runner = TestRunner::new(move |command| match subcommand(command) {
        Some("build") => {
            write_bep(command, &[app.clone()]);
            exit(0, "", "")
        }
        Some("query") => {
            let expression = command.args.last().cloned().unwrap_or_default();
            if expression.contains("//app:AllTests") {
                exit(0, suite_xml, "")
            } else {
                exit(7, "", "ERROR: no such package")
            }
        }
        other => panic!("unexpected subcommand {other:?}"),
    });

    let mut config = fixture.config();
    config.test_suites = TestSuiteStrategy::QueryFallback;
    let mut extractor = WorkspaceInfoExtractor::new(config, runner.clone());
    let options = ExtractorOptions::default();

    let map = extractor
        .rule_entries_for_labels(&[label("//app:App"), label("//app:AllTests")], &options)
        .unwrap();
    let suite = map.rule_entry(&label("//app:AllTests")).unwrap();
    assert!(suite.is_test_suite());
    assert!(suite.weak_dependencies().contains(&label("//app:UITests")));
    assert!(suite.dependencies.is_empty());

    let build = &runner.calls()[0];
    assert!(!build.args.iter().any(|arg| arg == "--noexpand_test_suites"));
    assert_eq!(runner.count("query"), 1);
    assert!(runner.calls()[1]
        .args
        .last()
        .is_some_and(|expr| expr.starts_with(r#"kind("test_suite rule", deps(//app:AllTests))"#)));

    // An unresolvable label is queried once, then only reported.
    for _ in 0..2 {
        extractor
            .rule_entries_for_labels(&[label("//gone:Suite")], &options)
            .unwrap();
    }
    assert_eq!(runner.count("query"), 2);
    assert_eq!(runner.count("build"), 3);
    let unresolved = extractor
        .take_warnings()
        .into_iter()
        .filter(|warning| matches!(warning, ExtractionWarning::UnresolvedLabels(_)))
        .count();
    assert_eq!(unresolved, 2);
}

#[test]
fn query_strategy_caps_concurrent_subprocesses() {
    let fixture = Fixture::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let runner = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        TestRunner::new(move |command| {
            assert_eq!(subcommand(command), Some("query"));
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            in_flight.fetch_sub(1, Ordering::SeqCst);

            let name = command.args.last().cloned().unwrap_or_default();
            exit(
                0,
                &format!(
                    r#"<query version="2"><rule class="objc_library" name="{name}"><list name="srcs"><label value="{name}.m"/></list></rule></query>"#
                ),
                "",
            )
        })
    };

    let mut config = fixture.config();
    config.strategy = ExtractionStrategy::Query;
    let mut extractor = WorkspaceInfoExtractor::new(config, runner.clone());

    let labels: Vec<BuildLabel> = (0..24).map(|i| label(&format!("//lib:l{i}"))).collect();
    let map = extractor
        .rule_entries_for_labels(&labels, &ExtractorOptions::default())
        .unwrap();

    assert_eq!(map.len(), 24);
    assert_eq!(runner.count("query"), 24);
    assert_eq!(runner.count("build"), 0);
    assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_QUERIES);
    assert_eq!(
        map.rule_entry(&label("//lib:l3")).unwrap().source_files[0].sub_path,
        "lib/l3.m"
    );
}

#[test]
fn startup_options_prefix_every_bazel_call() {
    let fixture = Fixture::new();
    let out = fixture.outputs.path();
    let app = write_artifact(out, "App", r#"{"label":"//app:App","type":"ios_application"}"#);
    let runner = TestRunner::new(move |command| match subcommand(command) {
        Some("build") => {
            write_bep(command, &[app.clone()]);
            exit(0, "", "")
        }
        Some("query") => exit(7, "", "ERROR: no such target"),
        Some("info") => exit(
            0,
            "execution_root: /custom/execroot/ws\noutput_base: /custom\n",
            "",
        ),
        other => panic!("unexpected subcommand {other:?}"),
    });

    let mut config = fixture
        .config()
        .with_startup_options("--output_base=/custom")
        .unwrap();
    config.test_suites = TestSuiteStrategy::QueryFallback;
    let options = ExtractorOptions::default();
    let mut extractor = WorkspaceInfoExtractor::new(config.clone(), runner.clone());
    extractor
        .rule_entries_for_labels(&[label("//app:App"), label("//app:AllTests")], &options)
        .unwrap();
    assert_eq!(extractor.execution_root(), "/custom/execroot/ws");

    config.strategy = ExtractionStrategy::Query;
    let mut query = WorkspaceInfoExtractor::new(config, runner.clone());
    query
        .rule_entries_for_labels(&[label("//app:Lib")], &options)
        .unwrap();
    query.extract_buildfiles(&[label("//app:Lib")]);

    for name in ["build", "query", "info"] {
        assert!(runner.count(name) >= 1, "no {name} call recorded");
    }
    for call in runner.calls() {
        assert_eq!(call.args[0], "--output_base=/custom", "{call}");
    }
}

#[test]
fn query_strategy_rejects_unbalanced_options() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| exit(0, "", ""));
    let mut config = fixture.config();
    config.strategy = ExtractionStrategy::Query;
    let mut extractor = WorkspaceInfoExtractor::new(config, runner.clone());

    let options = ExtractorOptions {
        project_generation: "--define \"oops".to_string(),
        ..Default::default()
    };
    let err = extractor
        .rule_entries_for_labels(&[label("//pkg:a")], &options)
        .unwrap_err();

    assert!(matches!(
        err,
        ExtractorError::InvalidOptions { kind: "project generation", .. }
    ));
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn unbalanced_startup_options_are_rejected() {
    let err = Fixture::new()
        .config()
        .with_startup_options("--output_base='/custom")
        .unwrap_err();
    assert!(matches!(err, ExtractorError::InvalidOptions { kind: "startup", .. }));
}
