//! On-disk fixtures: database snapshots and profile files under a
//! tempdir.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde_json::json;

use crate::value::Value;

/// Writes a database snapshot file holding `values` and `locks`, creating
/// parent directories as needed.
pub fn write_database(
    path: &Path,
    values: &[(&str, Value)],
    locks: &[&str],
) {
    let values: serde_json::Map<String, serde_json::Value> = values
        .iter()
        .map(|(key, value)| ((*key).to_owned(), serde_json::to_value(value).unwrap()))
        .collect();

    let snapshot = json!({ "values": values, "locks": locks });

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }

    fs::write(path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
}

pub fn remove_database(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Writes a profile file with the given contents, creating parent
/// directories as needed, and returns its path.
pub fn write_profile(
    path: &Path,
    contents: &str,
) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }

    fs::write(path, contents).unwrap();
    path.to_owned()
}

/// A profile file at an absolute location under `base`, usable as an
/// explicit selector.
pub fn explicit_profile(
    base: &Path,
    contents: &str,
) -> String {
    let path = base.join("profile");
    write_profile(&path, contents);
    path.to_string_lossy().into_owned()
}
