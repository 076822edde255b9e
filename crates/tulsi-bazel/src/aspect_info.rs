//! Decoding of the per-target `.tulsiinfo` JSON emitted by the Tulsi aspect.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
    str::FromStr,
};

use serde_json::{Map, Value};
use tulsi_model::{
    BazelFileInfo, BuildLabel, DeploymentTarget, FileKind, IncludePath, PlatformType,
    RuleAttribute, RuleEntry,
};

use crate::{error::ArtifactParseError, info_plist::extension_point_identifier};

pub const TULSIINFO_SUFFIX: &str = ".tulsiinfo";

/// Top-level keys the aspect is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKey {
    Label,
    Type,
    Attr,
    Artifacts,
    Srcs,
    NonArcSrcs,
    GeneratedFiles,
    GeneratedNonArcFiles,
    FrameworkImports,
    SecondaryProductArtifacts,
    SwiftTransitiveModules,
    ObjcModuleMaps,
    Includes,
    Defines,
    Deps,
    Extensions,
    BuildFile,
    OsDeploymentTarget,
    SwiftLanguageVersion,
    SwiftToolchain,
    BundleId,
    BundleName,
    ProductType,
    PlatformType,
    Infoplist,
}

impl FromStr for ArtifactKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "label" => ArtifactKey::Label,
            "type" => ArtifactKey::Type,
            "attr" => ArtifactKey::Attr,
            "artifacts" => ArtifactKey::Artifacts,
            "srcs" => ArtifactKey::Srcs,
            "non_arc_srcs" => ArtifactKey::NonArcSrcs,
            "generated_files" => ArtifactKey::GeneratedFiles,
            "generated_non_arc_files" => ArtifactKey::GeneratedNonArcFiles,
            "framework_imports" => ArtifactKey::FrameworkImports,
            "secondary_product_artifacts" => ArtifactKey::SecondaryProductArtifacts,
            "swift_transitive_modules" => ArtifactKey::SwiftTransitiveModules,
            "objc_module_maps" => ArtifactKey::ObjcModuleMaps,
            "includes" => ArtifactKey::Includes,
            "defines" => ArtifactKey::Defines,
            "deps" => ArtifactKey::Deps,
            "extensions" => ArtifactKey::Extensions,
            "build_file" => ArtifactKey::BuildFile,
            "os_deployment_target" => ArtifactKey::OsDeploymentTarget,
            "swift_language_version" => ArtifactKey::SwiftLanguageVersion,
            "swift_toolchain" => ArtifactKey::SwiftToolchain,
            "bundle_id" => ArtifactKey::BundleId,
            "bundle_name" => ArtifactKey::BundleName,
            "product_type" => ArtifactKey::ProductType,
            "platform_type" => ArtifactKey::PlatformType,
            "infoplist" => ArtifactKey::Infoplist,
            _ => return Err(()),
        })
    }
}

/// Read and decode one `.tulsiinfo` file. App-extension rules additionally
/// need their Info.plist, which the aspect writes next to the artifact.
pub fn parse_rule_entry_file(path: &Path) -> Result<RuleEntry, ArtifactParseError> {
    let bytes = fs::read(path).map_err(|err| ArtifactParseError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    decode_rule_entry(&bytes, path.parent())
}

/// Decode `.tulsiinfo` content. `artifact_dir` is where companion files
/// (extension Info.plists) are looked up.
pub fn decode_rule_entry(
    bytes: &[u8],
    artifact_dir: Option<&Path>,
) -> Result<RuleEntry, ArtifactParseError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| ArtifactParseError::Json(err.to_string()))?;
    let Value::Object(dict) = value else {
        return Err(ArtifactParseError::Json("top-level value is not an object".into()));
    };

    let label = dict
        .get("label")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ArtifactParseError::MissingField("label"))?;
    let rule_type = dict
        .get("type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ArtifactParseError::MissingField("type"))?;

    for key in dict.keys() {
        if key.parse::<ArtifactKey>().is_err() {
            tracing::warn!(
                target: "tulsi.bazel.aspect",
                label,
                key = key.as_str(),
                "ignoring unknown key in aspect output; aspect and extractor versions may differ"
            );
        }
    }

    let mut entry = RuleEntry::new(BuildLabel::new(label), rule_type);

    if let Some(attr) = dict.get("attr") {
        let Value::Object(attr) = attr else {
            return Err(invalid("attr", "expected an object"));
        };
        entry.attributes = decode_attributes(label, attr);
        for (attribute, value) in &entry.attributes {
            if attribute.is_linked_target() {
                if let Some(linked) = value.as_str() {
                    entry.info.linked_target_labels.insert(BuildLabel::new(linked));
                }
            }
        }
    }

    let generated_files = file_infos(&dict, "generated_files")?;
    let generated_non_arc_files = file_infos(&dict, "generated_non_arc_files")?;
    let generated_dirs: BTreeSet<String> = generated_files
        .iter()
        .chain(&generated_non_arc_files)
        .filter(|info| info.is_directory)
        .flat_map(|info| [info.full_path(), info.sub_path.clone()])
        .collect();

    entry.artifacts = file_infos(&dict, "artifacts")?;
    entry.source_files = file_infos(&dict, "srcs")?;
    entry
        .source_files
        .extend(generated_files.into_iter().filter(|info| !info.is_directory));
    entry.non_arc_source_files = file_infos(&dict, "non_arc_srcs")?;
    entry
        .non_arc_source_files
        .extend(generated_non_arc_files.into_iter().filter(|info| !info.is_directory));
    entry.framework_imports = file_infos(&dict, "framework_imports")?;
    entry.secondary_artifacts = file_infos(&dict, "secondary_product_artifacts")?;
    entry.swift_transitive_modules = file_infos(&dict, "swift_transitive_modules")?;
    entry.objc_module_maps = file_infos(&dict, "objc_module_maps")?;

    entry.include_paths = string_list(&dict, "includes")?.map(|includes| {
        includes
            .into_iter()
            .map(|path| IncludePath {
                generated: generated_dirs.contains(&path),
                path,
            })
            .collect()
    });
    entry.defines = string_list(&dict, "defines")?;

    for dep in string_list(&dict, "deps")?.unwrap_or_default() {
        entry.add_dependency(BuildLabel::new(dep));
    }
    entry.extensions = string_list(&dict, "extensions")?
        .unwrap_or_default()
        .into_iter()
        .map(BuildLabel::new)
        .collect();

    entry.build_file_path = string(&dict, "build_file")?;
    entry.swift_language_version = string(&dict, "swift_language_version")?;
    entry.swift_toolchain = string(&dict, "swift_toolchain")?;
    entry.bundle_id = string(&dict, "bundle_id")?;
    entry.bundle_name = string(&dict, "bundle_name")?;
    entry.product_type = string(&dict, "product_type")?;

    let platform_type = string(&dict, "platform_type")?;
    let os_deployment_target = string(&dict, "os_deployment_target")?;
    if let (Some(platform), Some(os_version)) = (platform_type, os_deployment_target) {
        match platform.parse::<PlatformType>() {
            Ok(platform) => {
                entry.deployment_target = Some(DeploymentTarget {
                    platform,
                    os_version,
                })
            }
            Err(err) => {
                tracing::warn!(target: "tulsi.bazel.aspect", label, error = %err, "ignoring deployment target");
            }
        }
    }

    if is_extension(&entry) {
        entry.extension_type = Some(extension_type(&dict, label, artifact_dir)?);
    }

    Ok(entry)
}

fn is_extension(entry: &RuleEntry) -> bool {
    entry.rule_type().ends_with("_extension")
        || entry
            .product_type
            .as_deref()
            .is_some_and(|product| product.contains("extension"))
}

fn extension_type(
    dict: &Map<String, Value>,
    label: &str,
    artifact_dir: Option<&Path>,
) -> Result<String, ArtifactParseError> {
    let plist_error = |message: String| ArtifactParseError::ExtensionPlist {
        label: label.to_string(),
        message,
    };

    let infoplist = string(dict, "infoplist")?
        .ok_or_else(|| plist_error("no `infoplist` reported by the aspect".into()))?;
    let file_name = Path::new(&infoplist)
        .file_name()
        .ok_or_else(|| plist_error(format!("`{infoplist}` has no file name")))?;
    let dir = artifact_dir.ok_or_else(|| plist_error("artifact location unknown".into()))?;

    extension_point_identifier(&dir.join(file_name)).map_err(plist_error)
}

fn decode_attributes(label: &str, attr: &Map<String, Value>) -> BTreeMap<RuleAttribute, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in attr {
        match key.parse::<RuleAttribute>() {
            Ok(attribute) => {
                out.insert(attribute, value.clone());
            }
            Err(_) => {
                tracing::warn!(
                    target: "tulsi.bazel.aspect",
                    label,
                    attribute = key.as_str(),
                    "dropping unknown rule attribute"
                );
            }
        }
    }
    out
}

fn invalid(field: &str, message: impl Into<String>) -> ArtifactParseError {
    ArtifactParseError::InvalidField {
        field: field.to_string(),
        message: message.into(),
    }
}

fn string(dict: &Map<String, Value>, field: &str) -> Result<Option<String>, ArtifactParseError> {
    match dict.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}

fn string_list(
    dict: &Map<String, Value>,
    field: &str,
) -> Result<Option<Vec<String>>, ArtifactParseError> {
    match dict.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| invalid(field, "expected an array of strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid(field, "expected an array")),
    }
}

fn file_infos(
    dict: &Map<String, Value>,
    field: &str,
) -> Result<Vec<BazelFileInfo>, ArtifactParseError> {
    let items = match dict.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(invalid(field, "expected an array")),
    };

    items.iter().map(|item| file_info(field, item)).collect()
}

fn file_info(field: &str, item: &Value) -> Result<BazelFileInfo, ArtifactParseError> {
    let Value::Object(info) = item else {
        return Err(invalid(field, "expected file info objects"));
    };
    let path = info
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(field, "file info without `path`"))?;
    let is_source = info.get("src").and_then(Value::as_bool).unwrap_or(true);
    let root = info.get("root").and_then(Value::as_str).unwrap_or_default();
    let is_directory = info.get("is_dir").and_then(Value::as_bool).unwrap_or(false);

    Ok(BazelFileInfo {
        kind: if is_source {
            FileKind::Source
        } else {
            FileKind::Generated
        },
        root_path: root.to_string(),
        sub_path: path.to_string(),
        is_directory,
    })
}
