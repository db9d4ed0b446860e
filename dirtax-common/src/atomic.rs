//! Atomic file persistence
//!
//! Every persisted artifact (cache metadata, vector matrices, pipeline
//! outputs) goes through [`write_atomic`]: the bytes are written to a
//! temporary file in the destination directory and renamed over the final
//! path. A reader therefore sees either the previous complete file or the
//! new complete file, never a partial write.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `bytes` to `path` via temp-file-then-rename.
///
/// The temporary file lives in the same directory as `path` so the final
/// rename never crosses a filesystem boundary. If any step fails the
/// temporary file is removed when the guard drops.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::trace!(path = %path.display(), bytes = bytes.len(), "Atomic write complete");
    Ok(())
}

/// Serialize `value` as pretty JSON (trailing newline) and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    write_atomic(path, &body)
}

/// Read and decode a JSON document, returning `None` when the file is absent.
///
/// A file that exists but does not decode is an error; callers decide
/// whether that means "recover" or "fail".
pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_write_atomic_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("out.bin");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_write_atomic_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"old contents that are longer").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"{}").unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_json_roundtrip_with_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc { name: "x".into(), count: 3 };
        write_json_atomic(&path, &doc).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("}\n"));

        let back: Option<Doc> = read_json_if_exists(&path).unwrap();
        assert_eq!(back, Some(doc));
    }

    #[test]
    fn test_read_json_if_exists_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let back: Option<Doc> = read_json_if_exists(&dir.path().join("nope.json")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_read_json_if_exists_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{\"name\": \"x\", \"cou").unwrap();
        let back: Result<Option<Doc>> = read_json_if_exists(&path);
        assert!(matches!(back, Err(Error::Json(_))));
    }
}
