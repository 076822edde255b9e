//! Extension-point lookup for app-extension Info.plist files.
//!
//! rules_apple may emit the merged Info.plist as XML or binary; both are
//! accepted.

use std::{io::Cursor, path::Path};

use plist::Value;

/// Read `NSExtension.NSExtensionPointIdentifier` from a property list.
pub fn extension_point_identifier(path: &Path) -> Result<String, String> {
    let value = Value::from_file(path).map_err(|err| format!("{}: {err}", path.display()))?;
    extension_point_identifier_from_value(&value)
}

pub(crate) fn extension_point_identifier_from_bytes(bytes: &[u8]) -> Result<String, String> {
    let value = Value::from_reader(Cursor::new(bytes)).map_err(|err| err.to_string())?;
    extension_point_identifier_from_value(&value)
}

fn extension_point_identifier_from_value(value: &Value) -> Result<String, String> {
    let top = value
        .as_dictionary()
        .ok_or_else(|| "plist root is not a dictionary".to_string())?;
    let extension = top
        .get("NSExtension")
        .and_then(Value::as_dictionary)
        .ok_or_else(|| "missing NSExtension dictionary".to_string())?;
    extension
        .get("NSExtensionPointIdentifier")
        .and_then(Value::as_string)
        .map(str::trim)
        .filter(|identifier| !identifier.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| "missing NSExtensionPointIdentifier".to_string())
}
