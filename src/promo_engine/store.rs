//! Best-effort JSON array files backing the history and rotation state

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::promo_engine::errors::PersistenceError;

/// Whether state files are written. Test runs read them but never write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Enabled,
    Disabled,
}

/// Reads a JSON array of strings. `Ok(None)` when the file does not exist;
/// non-string elements are skipped and counted in the second tuple slot.
pub fn read_string_array(path: &Path) -> Result<Option<(Vec<String>, usize)>, PersistenceError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let values: Vec<Value> = serde_json::from_str(&raw).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let total = values.len();
    let strings: Vec<String> = values
        .into_iter()
        .filter_map(|value| match value {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect();
    let skipped = total - strings.len();

    Ok(Some((strings, skipped)))
}

/// Rewrites the whole file. Goes through a sibling temp file so an interrupted
/// write never truncates the previous contents.
pub fn write_string_array<'a, I>(path: &Path, items: I) -> Result<(), PersistenceError>
where
    I: IntoIterator<Item = &'a String>,
{
    let items: Vec<&String> = items.into_iter().collect();
    let encoded = serde_json::to_string_pretty(&items).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = temp_path(path);
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(&tmp, encoded).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_string_array(&dir.path().join("absent.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_mixed_array_skips_non_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.json");
        fs::write(&path, r#"["a", 1, null, "b", {"x": 2}]"#).unwrap();

        let (items, skipped) = read_string_array(&path).unwrap().unwrap();
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(skipped, 3);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_string_array(&path), Err(PersistenceError::Json { .. })));
    }

    #[test]
    fn test_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let first = vec!["one".to_string(), "two".to_string()];
        let second = vec!["three".to_string()];

        write_string_array(&path, &first).unwrap();
        write_string_array(&path, &second).unwrap();

        let (items, _) = read_string_array(&path).unwrap().unwrap();
        assert_eq!(items, second);
        assert!(!temp_path(&path).exists());
    }
}
