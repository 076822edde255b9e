//! Shared value types for Bazel workspace extraction.
//!
//! Every extractor (query, aspect, `bazel info`) speaks in terms of these
//! types: build labels, file references, rule entries and the label-indexed
//! [`RuleEntryMap`] that collects them.

mod file_info;
mod flags;
mod label;
mod platform;
mod rule;
mod rule_map;

pub use crate::{
    file_info::{BazelFileInfo, FileKind},
    flags::{BazelFlags, BazelFlagsSet, CompilationMode},
    label::{BuildLabel, LabelError},
    platform::{CpuArch, PlatformConfiguration, PlatformType, UnknownValue},
    rule::{DeploymentTarget, IncludePath, RuleAttribute, RuleEntry, RuleInfo},
    rule_map::RuleEntryMap,
};
