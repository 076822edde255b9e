use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{BazelFileInfo, BuildLabel, PlatformType, UnknownValue};

/// The minimal identity of a Bazel target: its label, rule class and the
/// labels it is linked to (for example a test's host application).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub label: BuildLabel,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub linked_target_labels: BTreeSet<BuildLabel>,
}

impl RuleInfo {
    pub fn new(label: BuildLabel, rule_type: impl Into<String>) -> Self {
        Self {
            label,
            rule_type: rule_type.into(),
            linked_target_labels: BTreeSet::new(),
        }
    }
}

/// Rule attributes the extractor understands. Anything else reported by the
/// aspect is dropped with a schema-drift warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAttribute {
    Binary,
    Copts,
    CompilerDefines,
    Datamodels,
    EnableModules,
    HasSwiftDependency,
    HasSwiftInfo,
    LaunchImage,
    LaunchStoryboard,
    MinimumOsVersion,
    Pch,
    SupportingFiles,
    SwiftcOpts,
    TestHost,
    Xctest,
    XctestApp,
}

impl RuleAttribute {
    pub const ALL: [RuleAttribute; 16] = [
        RuleAttribute::Binary,
        RuleAttribute::Copts,
        RuleAttribute::CompilerDefines,
        RuleAttribute::Datamodels,
        RuleAttribute::EnableModules,
        RuleAttribute::HasSwiftDependency,
        RuleAttribute::HasSwiftInfo,
        RuleAttribute::LaunchImage,
        RuleAttribute::LaunchStoryboard,
        RuleAttribute::MinimumOsVersion,
        RuleAttribute::Pch,
        RuleAttribute::SupportingFiles,
        RuleAttribute::SwiftcOpts,
        RuleAttribute::TestHost,
        RuleAttribute::Xctest,
        RuleAttribute::XctestApp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuleAttribute::Binary => "binary",
            RuleAttribute::Copts => "copts",
            RuleAttribute::CompilerDefines => "compiler_defines",
            RuleAttribute::Datamodels => "datamodels",
            RuleAttribute::EnableModules => "enable_modules",
            RuleAttribute::HasSwiftDependency => "has_swift_dependency",
            RuleAttribute::HasSwiftInfo => "has_swift_info",
            RuleAttribute::LaunchImage => "launch_image",
            RuleAttribute::LaunchStoryboard => "launch_storyboard",
            RuleAttribute::MinimumOsVersion => "minimum_os_version",
            RuleAttribute::Pch => "pch",
            RuleAttribute::SupportingFiles => "supporting_files",
            RuleAttribute::SwiftcOpts => "swiftc_opts",
            RuleAttribute::TestHost => "test_host",
            RuleAttribute::Xctest => "xctest",
            RuleAttribute::XctestApp => "xctest_app",
        }
    }

    /// Attributes whose value is the label of another target the rule is
    /// linked to.
    pub fn is_linked_target(self) -> bool {
        matches!(self, RuleAttribute::TestHost | RuleAttribute::XctestApp)
    }
}

impl fmt::Display for RuleAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAttribute {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleAttribute::ALL
            .into_iter()
            .find(|attr| attr.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "rule attribute",
                value: s.to_string(),
            })
    }
}

/// Platform and minimum OS version a configured rule targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub platform: PlatformType,
    pub os_version: String,
}

/// An include search path, flagged when it lives under a generated-output root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludePath {
    pub path: String,
    pub generated: bool,
}

/// A fully resolved Bazel target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEntry {
    #[serde(flatten)]
    pub info: RuleInfo,
    pub attributes: BTreeMap<RuleAttribute, serde_json::Value>,
    pub artifacts: Vec<BazelFileInfo>,
    pub source_files: Vec<BazelFileInfo>,
    pub non_arc_source_files: Vec<BazelFileInfo>,
    pub framework_imports: Vec<BazelFileInfo>,
    pub secondary_artifacts: Vec<BazelFileInfo>,
    pub swift_transitive_modules: Vec<BazelFileInfo>,
    pub objc_module_maps: Vec<BazelFileInfo>,
    pub dependencies: BTreeSet<BuildLabel>,
    /// Labels that may or may not end up in the build graph (for example the
    /// possible members of a `test_suite`). Never hard requirements, and never
    /// overlapping with `dependencies`.
    weak_dependencies: BTreeSet<BuildLabel>,
    pub extensions: BTreeSet<BuildLabel>,
    pub include_paths: Option<Vec<IncludePath>>,
    pub defines: Option<Vec<String>>,
    pub build_file_path: Option<String>,
    pub deployment_target: Option<DeploymentTarget>,
    pub swift_language_version: Option<String>,
    pub swift_toolchain: Option<String>,
    pub bundle_id: Option<String>,
    pub bundle_name: Option<String>,
    pub product_type: Option<String>,
    pub extension_type: Option<String>,
}

impl RuleEntry {
    pub fn new(label: BuildLabel, rule_type: impl Into<String>) -> Self {
        Self {
            info: RuleInfo::new(label, rule_type),
            attributes: BTreeMap::new(),
            artifacts: Vec::new(),
            source_files: Vec::new(),
            non_arc_source_files: Vec::new(),
            framework_imports: Vec::new(),
            secondary_artifacts: Vec::new(),
            swift_transitive_modules: Vec::new(),
            objc_module_maps: Vec::new(),
            dependencies: BTreeSet::new(),
            weak_dependencies: BTreeSet::new(),
            extensions: BTreeSet::new(),
            include_paths: None,
            defines: None,
            build_file_path: None,
            deployment_target: None,
            swift_language_version: None,
            swift_toolchain: None,
            bundle_id: None,
            bundle_name: None,
            product_type: None,
            extension_type: None,
        }
    }

    pub fn label(&self) -> &BuildLabel {
        &self.info.label
    }

    pub fn rule_type(&self) -> &str {
        &self.info.rule_type
    }

    pub fn weak_dependencies(&self) -> &BTreeSet<BuildLabel> {
        &self.weak_dependencies
    }

    /// Record candidate dependencies. Labels already present as hard
    /// dependencies are skipped.
    pub fn add_weak_dependencies(&mut self, labels: impl IntoIterator<Item = BuildLabel>) {
        for label in labels {
            if !self.dependencies.contains(&label) {
                self.weak_dependencies.insert(label);
            }
        }
    }

    /// Promote a label to a hard dependency, dropping it from the weak set.
    pub fn add_dependency(&mut self, label: BuildLabel) {
        self.weak_dependencies.remove(&label);
        self.dependencies.insert(label);
    }

    pub fn attribute(&self, attribute: RuleAttribute) -> Option<&serde_json::Value> {
        self.attributes.get(&attribute)
    }

    pub fn is_test_suite(&self) -> bool {
        self.info.rule_type == "test_suite"
    }
}
