use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tulsi_bazel::{
    bazel_workspace_root, DefaultCommandRunner, ExtractionStrategy, ExtractionWarning,
    WorkspaceInfoExtractor,
};
use tulsi_config::GeneratorConfig;
use tulsi_model::{BazelFlags, BuildLabel, CompilationMode, RuleEntryMap, RuleInfo};

const DEFAULT_CONFIG_FILE: &str = "tulsi.toml";

#[derive(Parser)]
#[command(
    name = "tulsi-extract",
    version,
    about = "Extract Bazel rule information for Xcode project generation"
)]
struct Cli {
    /// Generator config (defaults to `tulsi.toml` in the workspace root, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Bazel workspace root (defaults to the workspace containing the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Emit JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve rule entries for build labels
    Rules(LabelsArgs),
    /// List the rules defined in packages
    Packages(PackagesArgs),
    /// List the BUILD and .bzl files that define build labels
    Buildfiles(LabelsArgs),
    /// Print Bazel output paths and the flags generated projects build with
    Info,
}

#[derive(Args)]
struct LabelsArgs {
    #[arg(required = true)]
    labels: Vec<String>,
}

#[derive(Args)]
struct PackagesArgs {
    #[arg(required = true)]
    packages: Vec<String>,
}

#[derive(Serialize)]
struct InfoReport {
    workspace_root: PathBuf,
    execution_root: String,
    output_base: String,
    bazel_bin_symlink_name: String,
    debug: BazelFlags,
    release: BazelFlags,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let workspace = resolve_workspace(cli.workspace.as_deref())?;
    let config_path = cli
        .config
        .clone()
        .or_else(|| Some(workspace.join(DEFAULT_CONFIG_FILE)).filter(|path| path.is_file()));
    let (mut config, unknown_keys) = match &config_path {
        Some(path) => GeneratorConfig::load_from_path_with_diagnostics(path)?,
        None => (GeneratorConfig::default(), Vec::new()),
    };

    tulsi_config::init_tracing(&config.logging);
    for key in unknown_keys {
        tracing::warn!(target: "tulsi.config", key, "ignoring unknown config key");
    }

    // Only `rules` builds with the aspect; everything else is a query.
    if !matches!(cli.command, Command::Rules(_)) {
        config.extraction = ExtractionStrategy::Query;
    }
    let mut extractor =
        WorkspaceInfoExtractor::with_default_runner(config.extractor_config(&workspace)?);

    let result = execute(&mut extractor, &config, cli.command, cli.json);
    extractor.debug_info().flush_to_log();
    result
}

fn resolve_workspace(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            bazel_workspace_root(&cwd)
                .with_context(|| format!("no Bazel workspace found above {}", cwd.display()))
        }
    }
}

fn execute(
    extractor: &mut WorkspaceInfoExtractor<DefaultCommandRunner>,
    config: &GeneratorConfig,
    command: Command,
    json: bool,
) -> Result<i32> {
    match command {
        Command::Rules(args) => {
            let labels = parse_labels(&args.labels)?;
            let options = config.options.extractor_options();
            let entries = extractor.rule_entries_for_labels(&labels, &options)?;
            print_rule_entries(entries, json)?;

            let warnings = extractor.take_warnings();
            for warning in &warnings {
                eprintln!("warning: {}", describe_warning(warning));
            }
            Ok(if warnings.is_empty() { 0 } else { 1 })
        }
        Command::Packages(args) => {
            let infos = extractor.extract_rule_info_from_packages(&args.packages);
            print_rule_infos(&infos, json)?;
            Ok(0)
        }
        Command::Buildfiles(args) => {
            let labels = parse_labels(&args.labels)?;
            let files = extractor.extract_buildfiles(&labels);
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                for file in files {
                    println!("{file}");
                }
            }
            Ok(0)
        }
        Command::Info => {
            let flags = extractor.build_flags(&config.options.user_build_options()?);
            let report = InfoReport {
                workspace_root: extractor.workspace_root().to_path_buf(),
                execution_root: extractor.execution_root().to_string(),
                output_base: extractor.output_base().to_string(),
                bazel_bin_symlink_name: extractor.bazel_bin_symlink_name().to_string(),
                debug: flags.flags(CompilationMode::Debug).clone(),
                release: flags.flags(CompilationMode::Release).clone(),
            };
            print_info(&report, json)?;
            Ok(if extractor.workspace_info().is_complete() { 0 } else { 1 })
        }
    }
}

fn parse_labels(raw: &[String]) -> Result<Vec<BuildLabel>> {
    raw.iter()
        .map(|label| BuildLabel::parse(label).with_context(|| format!("invalid label `{label}`")))
        .collect()
}

fn describe_warning(warning: &ExtractionWarning) -> String {
    match warning {
        ExtractionWarning::AspectParseFailures { paths } => {
            format!("failed to parse aspect output for {} rule(s)", paths.len())
        }
        ExtractionWarning::UnresolvedLabels(labels) => {
            let labels: Vec<&str> = labels.iter().map(BuildLabel::as_str).collect();
            format!("could not resolve {}", labels.join(", "))
        }
    }
}

fn print_rule_entries(entries: &RuleEntryMap, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    for entry in entries.entries() {
        println!("{} ({})", entry.label(), entry.rule_type());
        println!("  sources: {}", entry.source_files.len());
        if !entry.dependencies.is_empty() {
            println!("  deps: {}", entry.dependencies.len());
        }
        if let Some(target) = &entry.deployment_target {
            println!("  deployment target: {} {}", target.platform, target.os_version);
        }
    }
    Ok(())
}

fn print_rule_infos(infos: &[RuleInfo], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(infos)?);
        return Ok(());
    }
    for info in infos {
        println!("{}\t{}", info.label, info.rule_type);
    }
    Ok(())
}

fn print_info(report: &InfoReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("workspace_root: {}", report.workspace_root.display());
    println!("execution_root: {}", report.execution_root);
    println!("output_base: {}", report.output_base);
    println!("bin symlink: {}", report.bazel_bin_symlink_name);
    println!("debug build flags: {}", report.debug.build.join(" "));
    println!("release build flags: {}", report.release.build.join(" "));
    Ok(())
}
