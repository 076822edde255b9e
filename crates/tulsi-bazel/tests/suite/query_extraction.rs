use std::sync::Arc;

use tulsi_bazel::QueryExtractor;
use tulsi_model::BuildLabel;

use super::support::{exit, Fixture, TestRunner};

const PACKAGE_RULES: &str = r#"<?xml version="1.1" encoding="UTF-8" standalone="no"?>
<query version="2">
  <rule class="ios_application" location="/ws/app/BUILD:1:1" name="//app:App"/>
  <rule class="ios_unit_test" location="/ws/app/BUILD:9:1" name="//app:Tests">
    <label name="test_host" value="//app:App"/>
  </rule>
</query>"#;

fn extractor(fixture: &Fixture, runner: &TestRunner) -> QueryExtractor<TestRunner> {
    QueryExtractor::new(Arc::new(runner.clone()), "bazel", fixture.workspace.path())
}

#[test]
fn package_rules_use_one_query() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| exit(0, PACKAGE_RULES, ""));

    let infos = extractor(&fixture, &runner)
        .extract_target_rules_from_packages(&["app".to_string(), "//lib".to_string()]);

    assert_eq!(infos.len(), 2);
    assert!(infos[1].linked_target_labels.contains(&BuildLabel::new("//app:App")));

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].args,
        vec![
            "query",
            "--noimplicit_deps",
            "--order_output=no",
            "--noshow_loading_progress",
            "--noshow_progress",
            "--output=xml",
            "kind(rule, //app:all)+kind(rule, //lib:all)",
        ]
    );
}

#[test]
fn failed_queries_yield_nothing() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| exit(1, "", "ERROR: no such package 'app'\nERROR: second\n"));
    let extractor = extractor(&fixture, &runner);

    assert!(extractor
        .extract_target_rules_from_packages(&["app".to_string()])
        .is_empty());
    assert!(extractor
        .extract_test_suite_rules(&[BuildLabel::new("//app:AllTests")])
        .is_empty());
    assert!(extractor
        .extract_buildfiles(&[BuildLabel::new("//app:App")])
        .is_empty());
    assert_eq!(runner.call_count(), 3);
}

#[test]
fn buildfiles_are_read_from_source_file_elements() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| {
        exit(
            0,
            r#"<query version="2">
                <source-file name="//app:BUILD" location="/ws/app/BUILD:1:1"/>
                <source-file name="//tools:defs.bzl" location="/ws/tools/defs.bzl:1:1"/>
            </query>"#,
            "",
        )
    });

    let files = extractor(&fixture, &runner).extract_buildfiles(&[
        BuildLabel::new("//app:App"),
        BuildLabel::new("//app:Tests"),
    ]);

    assert_eq!(
        files,
        vec![BuildLabel::new("//app:BUILD"), BuildLabel::new("//tools:defs.bzl")]
    );
    assert_eq!(
        runner.calls()[0].args.last().map(String::as_str),
        Some("buildfiles(//app:App+//app:Tests)")
    );
}

#[test]
fn empty_requests_skip_bazel() {
    let fixture = Fixture::new();
    let runner = TestRunner::new(|_| exit(0, "", ""));
    let extractor = extractor(&fixture, &runner);

    assert!(extractor.extract_target_rules_from_packages(&[]).is_empty());
    assert!(extractor.extract_rule_entries(&[]).is_empty());
    assert_eq!(runner.call_count(), 0);
}
