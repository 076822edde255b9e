//! `bazel query --output=xml` invocation and parsing.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rayon::prelude::*;
use roxmltree::{Document, Node};
use serde_json::Value;
use tulsi_model::{BazelFileInfo, BuildLabel, RuleAttribute, RuleEntry, RuleEntryMap, RuleInfo};

use crate::{
    command::{BazelCommand, CommandOutput, CommandRunner},
    error::ExtractorError,
    workspace::workspace_path_from_label,
};

/// Upper bound on `bazel query` subprocesses in flight at once.
pub const MAX_CONCURRENT_QUERIES: usize = 8;

const ERROR_LINES_LOGGED: usize = 3;

/// Issues `bazel query` invocations and parses their XML output.
///
/// Query failures are never fatal: they are logged and yield empty results.
#[derive(Debug)]
pub struct QueryExtractor<R: CommandRunner> {
    runner: Arc<R>,
    bazel: PathBuf,
    workspace_root: PathBuf,
    startup: Vec<String>,
    timeout: Option<Duration>,
}

impl<R: CommandRunner> QueryExtractor<R> {
    pub fn new(
        runner: Arc<R>,
        bazel: impl Into<PathBuf>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            bazel: bazel.into(),
            workspace_root: workspace_root.into(),
            startup: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_startup_options(mut self, startup: Vec<String>) -> Self {
        self.startup = startup;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn query_command(&self, expression: &str) -> BazelCommand {
        let mut args = self.startup.clone();
        args.extend(
            [
                "query",
                "--noimplicit_deps",
                "--order_output=no",
                "--noshow_loading_progress",
                "--noshow_progress",
                "--output=xml",
            ]
            .map(String::from),
        );
        args.push(expression.to_string());
        BazelCommand::new(&self.workspace_root, &self.bazel, args).with_timeout(self.timeout)
    }

    /// Every rule target in `packages` (`//pkg` or `pkg`).
    pub fn extract_target_rules_from_packages(&self, packages: &[String]) -> Vec<RuleInfo> {
        if packages.is_empty() {
            return Vec::new();
        }
        let expression = packages
            .iter()
            .map(|package| format!("kind(rule, {}:all)", normalize_package(package)))
            .collect::<Vec<_>>()
            .join("+");

        let Some(output) = self.run_query(&expression, FailureLevel::Error) else {
            return Vec::new();
        };
        parse_rule_infos(&output.stdout).unwrap_or_else(|err| {
            tracing::error!(target: "tulsi.bazel.query", error = %err, "unreadable package query output");
            Vec::new()
        })
    }

    /// The `test_suite` rules reachable from `labels`. Each entry carries every
    /// label the suite could expand to as a weak dependency.
    pub fn extract_test_suite_rules(&self, labels: &[BuildLabel]) -> RuleEntryMap {
        if labels.is_empty() {
            return RuleEntryMap::new();
        }
        let deps = labels
            .iter()
            .map(|label| format!("deps({label})"))
            .collect::<Vec<_>>()
            .join("+");
        let expression = format!(r#"kind("test_suite rule", {deps})"#);

        let Some(output) = self.run_query(&expression, FailureLevel::Info) else {
            return RuleEntryMap::new();
        };
        parse_test_suite_rules(&output.stdout).unwrap_or_else(|err| {
            tracing::info!(target: "tulsi.bazel.query", error = %err, "unreadable test_suite query output");
            RuleEntryMap::new()
        })
    }

    /// Labels of the BUILD files that define `labels`.
    pub fn extract_buildfiles(&self, labels: &[BuildLabel]) -> Vec<BuildLabel> {
        if labels.is_empty() {
            return Vec::new();
        }
        let joined = labels
            .iter()
            .map(BuildLabel::as_str)
            .collect::<Vec<_>>()
            .join("+");
        let expression = format!("buildfiles({joined})");

        let Some(output) = self.run_query(&expression, FailureLevel::Info) else {
            return Vec::new();
        };
        parse_buildfiles(&output.stdout).unwrap_or_else(|err| {
            tracing::info!(target: "tulsi.bazel.query", error = %err, "unreadable buildfiles query output");
            Vec::new()
        })
    }

    /// Resolve each label with its own query, at most
    /// [`MAX_CONCURRENT_QUERIES`] at a time. Blocks until all have finished.
    pub fn extract_rule_entries(&self, labels: &[BuildLabel]) -> RuleEntryMap {
        let resolve = |label: &BuildLabel| -> RuleEntryMap {
            let Some(output) = self.run_query(label.as_str(), FailureLevel::Info) else {
                return RuleEntryMap::new();
            };
            parse_rule_entries(&output.stdout).unwrap_or_else(|err| {
                tracing::warn!(target: "tulsi.bazel.query", %label, error = %err, "unreadable rule query output");
                RuleEntryMap::new()
            })
        };

        let results: Vec<RuleEntryMap> = match rayon::ThreadPoolBuilder::new()
            .num_threads(MAX_CONCURRENT_QUERIES)
            .thread_name(|idx| format!("tulsi-query-{idx}"))
            .build()
        {
            Ok(pool) => pool.install(|| labels.par_iter().map(resolve).collect()),
            Err(err) => {
                tracing::warn!(target: "tulsi.bazel.query", error = %err, "query pool unavailable; resolving sequentially");
                labels.iter().map(resolve).collect()
            }
        };

        let mut out = RuleEntryMap::new();
        for map in results {
            out.merge(map);
        }
        out
    }

    fn run_query(&self, expression: &str, level: FailureLevel) -> Option<CommandOutput> {
        let command = self.query_command(expression);
        let output = match self.runner.run(&command) {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(target: "tulsi.bazel.query", command = %command, error = %err, "failed to run bazel query");
                return None;
            }
        };
        if output.success() {
            return Some(output);
        }

        let errors = output.error_lines(ERROR_LINES_LOGGED).join("\n");
        match level {
            FailureLevel::Error => tracing::error!(
                target: "tulsi.bazel.query",
                command = %command,
                exit_code = ?output.exit_code,
                "bazel query failed:\n{errors}"
            ),
            FailureLevel::Info => tracing::info!(
                target: "tulsi.bazel.query",
                command = %command,
                exit_code = ?output.exit_code,
                "bazel query returned no usable results:\n{errors}"
            ),
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
enum FailureLevel {
    Error,
    Info,
}

fn normalize_package(package: &str) -> String {
    if package.starts_with("//") || package.starts_with('@') {
        package.to_string()
    } else {
        format!("//{package}")
    }
}

/// A `<rule>` element with its required attributes.
struct QueryRule<'a, 'input> {
    node: Node<'a, 'input>,
    name: &'a str,
    class: &'a str,
}

fn parse_document(xml: &str) -> Result<Document<'_>, ExtractorError> {
    let doc = Document::parse(xml).map_err(|err| ExtractorError::ParsingFailed(err.to_string()))?;
    if !doc.root_element().has_tag_name("query") {
        return Err(ExtractorError::ParsingFailed(format!(
            "unexpected root element <{}>",
            doc.root_element().tag_name().name()
        )));
    }
    Ok(doc)
}

fn query_rules<'a, 'input>(doc: &'a Document<'input>) -> Vec<QueryRule<'a, 'input>> {
    let mut out = Vec::new();
    for node in doc.root_element().children().filter(|n| n.has_tag_name("rule")) {
        match (node.attribute("name"), node.attribute("class")) {
            (Some(name), Some(class)) if !name.is_empty() && !class.is_empty() => {
                out.push(QueryRule { node, name, class });
            }
            _ => {
                tracing::warn!(
                    target: "tulsi.bazel.query",
                    position = node.range().start,
                    "skipping <rule> without name or class"
                );
            }
        }
    }
    out
}

fn named_children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = (&'a str, Node<'a, 'input>)> {
    node.children()
        .filter(move |child| child.has_tag_name(tag))
        .filter_map(|child| child.attribute("name").map(|name| (name, child)))
}

fn list_labels<'a>(rule: Node<'a, '_>, name: &str) -> Vec<&'a str> {
    named_children(rule, "list")
        .filter(|(list_name, _)| *list_name == name)
        .flat_map(|(_, list)| list.children().filter(|n| n.has_tag_name("label")))
        .filter_map(|label| label.attribute("value"))
        .collect()
}

fn linked_labels(rule: Node<'_, '_>) -> Vec<BuildLabel> {
    named_children(rule, "label")
        .filter(|(name, _)| {
            name.parse::<RuleAttribute>()
                .is_ok_and(RuleAttribute::is_linked_target)
        })
        .filter_map(|(_, node)| node.attribute("value"))
        .map(BuildLabel::new)
        .collect()
}

/// `RuleInfo`s for every well-formed `<rule>` element.
pub fn parse_rule_infos(xml: &str) -> Result<Vec<RuleInfo>, ExtractorError> {
    let doc = parse_document(xml)?;
    Ok(query_rules(&doc)
        .into_iter()
        .map(|rule| {
            let mut info = RuleInfo::new(BuildLabel::new(rule.name), rule.class);
            info.linked_target_labels.extend(linked_labels(rule.node));
            info
        })
        .collect())
}

/// `test_suite` entries whose `rule-input`s become weak dependencies.
pub fn parse_test_suite_rules(xml: &str) -> Result<RuleEntryMap, ExtractorError> {
    let doc = parse_document(xml)?;
    let mut out = RuleEntryMap::new();
    for rule in query_rules(&doc) {
        let mut entry = RuleEntry::new(BuildLabel::new(rule.name), rule.class);
        entry.add_weak_dependencies(
            rule.node
                .children()
                .filter(|n| n.has_tag_name("rule-input"))
                .filter_map(|n| n.attribute("name"))
                .map(BuildLabel::new),
        );
        out.insert(entry);
    }
    Ok(out)
}

/// Rule entries resolved from query attributes alone: sources, deps, and any
/// scalar attribute with a known name.
pub fn parse_rule_entries(xml: &str) -> Result<RuleEntryMap, ExtractorError> {
    let doc = parse_document(xml)?;
    let mut out = RuleEntryMap::new();

    for rule in query_rules(&doc) {
        let mut entry = RuleEntry::new(BuildLabel::new(rule.name), rule.class);
        entry.info.linked_target_labels.extend(linked_labels(rule.node));

        for list in ["srcs", "hdrs"] {
            entry
                .source_files
                .extend(list_labels(rule.node, list).into_iter().filter_map(source_file));
        }
        entry.non_arc_source_files.extend(
            list_labels(rule.node, "non_arc_srcs")
                .into_iter()
                .filter_map(source_file),
        );
        for dep in list_labels(rule.node, "deps") {
            entry.add_dependency(BuildLabel::new(dep));
        }

        for child in rule.node.children().filter(Node::is_element) {
            let Some(attribute) = child
                .attribute("name")
                .and_then(|name| name.parse::<RuleAttribute>().ok())
            else {
                continue;
            };
            if let Some(value) = attribute_value(child) {
                entry.attributes.insert(attribute, value);
            }
        }

        out.insert(entry);
    }
    Ok(out)
}

fn attribute_value(node: Node<'_, '_>) -> Option<Value> {
    match node.tag_name().name() {
        "boolean" => Some(Value::Bool(node.attribute("value")? == "true")),
        "string" | "label" | "int" => Some(Value::String(node.attribute("value")?.to_string())),
        "list" => Some(Value::Array(
            node.children()
                .filter_map(|item| item.attribute("value"))
                .map(|value| Value::String(value.to_string()))
                .collect(),
        )),
        _ => None,
    }
}

fn source_file(label: &str) -> Option<BazelFileInfo> {
    let path = workspace_path_from_label(label)?;
    Some(BazelFileInfo::source(path.to_string_lossy()))
}

/// Labels of `<source-file>` elements (the BUILD and .bzl files).
pub fn parse_buildfiles(xml: &str) -> Result<Vec<BuildLabel>, ExtractorError> {
    let doc = parse_document(xml)?;
    let mut out = Vec::new();
    for node in doc
        .root_element()
        .children()
        .filter(|n| n.has_tag_name("source-file"))
    {
        match node.attribute("name") {
            Some(name) if !name.is_empty() => out.push(BuildLabel::new(name)),
            _ => {
                tracing::warn!(target: "tulsi.bazel.query", "skipping <source-file> without name");
            }
        }
    }
    Ok(out)
}
