//! Record file writes.
//!
//! Readers never lock, so a record is only ever replaced whole: the new bytes
//! go to a temp file in the same directory which is then renamed over the
//! target.

use std::fs;
use std::io;
use std::path::Path;

/// Prefix of in-flight temp files. Listings skip these.
pub const TEMP_PREFIX: &str = ".tmp_";

/// Atomic write via temp file + rename
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

/// Remove a file. `Ok(false)` when it was already gone.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Hidden entries (temp files, `.locks`) are not records.
pub fn is_hidden(file_name: &str) -> bool {
    file_name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("bavaro.xml");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_rename_cleans_up_temp() {
        let temp = tempfile::TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let target = temp.path().join("busy.xml");
        fs::create_dir_all(target.join("inner")).unwrap();
        assert!(atomic_write(&target, b"data").is_err());

        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["busy.xml"]);
    }

    #[test]
    fn test_remove_if_exists() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("gone.xml");
        fs::write(&path, "x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
