//! Atomic JSON persistence.
//!
//! Every store in the runtime (jobs, notes, conversations, catalog) is a
//! UTF-8 JSON file rewritten whole on mutation. Writes go to a temp file in
//! the same directory and are renamed into place, so readers never observe a
//! partial file.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, Result};

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// Parent directories are created as needed.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CoreError::Store(format!("path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    let json = serde_json::to_string_pretty(value)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| CoreError::Store(format!("rename into {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Load and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Load a JSON file, returning `default` when the file does not exist.
pub fn read_json_or<T: DeserializeOwned>(path: &Path, default: T) -> Result<T> {
    if !path.exists() {
        return Ok(default);
    }
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample {
            name: "alpha".into(),
            count: 3,
        };
        write_json_atomic(&path, &value).unwrap();
        let loaded: Sample = read_json(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn rewrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(&path, &vec!["a", "b", "c"]).unwrap();
        write_json_atomic(&path, &vec!["z"]).unwrap();
        let loaded: Vec<String> = read_json(&path).unwrap();
        assert_eq!(loaded, vec!["z"]);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded: Vec<String> = read_json_or(&path, Vec::new()).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/sample.json");
        write_json_atomic(&path, &1u32).unwrap();
        assert!(path.exists());
    }
}
