// ── JSON file helpers ──
//
// Whole-file JSON persistence. Writes go to a sibling temp file that is
// renamed over the target, so a crash never leaves a half-written store.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

fn unavailable(path: &Path, reason: impl ToString) -> CoreError {
    CoreError::StoreUnavailable {
        location: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Read `path`, or return `T::default()` when it does not exist yet.
pub fn load_or_default<T>(path: &Path) -> Result<T, CoreError>
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(unavailable(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|e| unavailable(path, format!("corrupt store file: {e}")))
}

pub fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| unavailable(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| CoreError::Internal(format!("serialize {}: {e}", path.display())))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, body).map_err(|e| unavailable(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| unavailable(path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let got: Vec<String> = load_or_default(&dir.path().join("nope.json")).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn save_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rows.json");

        save(&path, &vec!["a".to_owned(), "b".to_owned()]).unwrap();

        let got: Vec<String> = load_or_default(&path).unwrap();
        assert_eq!(got, vec!["a", "b"]);
        assert!(!dir.path().join("nested").join("rows.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_or_default::<Vec<String>>(&path).unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable { .. }));
    }
}
