//! Bazel workspace extraction for Xcode project generation.
//!
//! This crate turns a Bazel workspace into a graph of [`RuleEntry`] values:
//! - rule discovery and `test_suite` expansion via `bazel query --output=xml`
//! - full rule resolution via a build with the Tulsi aspect attached, reading
//!   the Build Event Protocol stream to locate the emitted `.tulsiinfo` files
//! - `execution_root` / `output_base` lookup via `bazel info`
//! - a caching façade ([`WorkspaceInfoExtractor`]) that batches requests
//!
//! [`RuleEntry`]: tulsi_model::RuleEntry

mod aspect;
mod aspect_info;
mod bep;
mod command;
mod debug_info;
mod error;
mod extractor;
mod info;
mod info_plist;
mod query;
mod settings;
mod workspace;

pub use crate::{
    aspect::{
        ArtifactFailure, AspectExtraction, AspectExtractor, AspectOptions, ASPECT_SYMLINK_PREFIX,
    },
    aspect_info::{decode_rule_entry, parse_rule_entry_file, TULSIINFO_SUFFIX},
    bep::{parse_build_events, read_build_events, BuildEvent, BuildEventFile},
    command::{BazelCommand, CommandOutput, CommandRunner, DefaultCommandRunner},
    debug_info::{DebugInfo, DebugInfoQueue},
    error::{ArtifactParseError, ExtractorError},
    extractor::{
        ExtractionStrategy, ExtractionWarning, ExtractorConfig, ExtractorOptions,
        TestSuiteStrategy, WorkspaceInfoExtractor,
    },
    info::{parse_bazel_info, WorkspaceInfo, WorkspacePathInfoFetcher},
    info_plist::extension_point_identifier,
    query::{
        parse_buildfiles, parse_rule_entries, parse_rule_infos, parse_test_suite_rules,
        QueryExtractor, MAX_CONCURRENT_QUERIES,
    },
    settings::{BazelSettingsProvider, UserBuildOptions},
    workspace::{bazel_workspace_root, is_bazel_workspace, workspace_path_from_label},
};
