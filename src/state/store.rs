//! File-backed state store

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Errors for state operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid state key {0:?}")]
    InvalidKey(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StateError {
    fn io(path: &Path, source: io::Error) -> Self {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Last successful publish of a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Fully qualified ref name, e.g. `refs/heads/main`
    pub ref_name: String,

    /// Target id that was published
    pub last_published_target: String,
}

/// Directory of per-ref records.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Open a store rooted at `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A store nested under `<root>/<name>`, used to keep one record per
    /// ref and package when several packages are built.
    pub fn scoped(&self, name: &str) -> Result<StateStore, StateError> {
        if name.contains('/') {
            return Err(StateError::InvalidKey(name.to_string()));
        }
        Ok(StateStore::new(self.resolve(name)?))
    }

    /// Path of the record for `ref_name`.
    ///
    /// Ref names must be relative and may not contain `.`/`..` or empty
    /// components, so a record can never land outside the root.
    pub fn resolve(&self, ref_name: &str) -> Result<PathBuf, StateError> {
        let invalid = || StateError::InvalidKey(ref_name.to_string());

        if ref_name.is_empty() || ref_name.contains('\0') || ref_name.ends_with('/') {
            return Err(invalid());
        }
        if ref_name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(invalid());
        }

        let relative = Path::new(ref_name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(invalid());
        }

        Ok(self.root.join(relative))
    }

    /// Look up the record for `ref_name`.
    pub fn get(&self, ref_name: &str) -> Result<Option<BuildRecord>, StateError> {
        let path = self.resolve(ref_name)?;

        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(BuildRecord {
                ref_name: ref_name.to_string(),
                last_published_target: content.trim().to_string(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::io(&path, e)),
        }
    }

    /// Record `target` as the last published target of `ref_name`.
    ///
    /// Parent directories are created as needed. The record is written to a
    /// temporary file in the same directory, synced, then renamed over the
    /// old one.
    pub fn put(&self, ref_name: &str, target: &str) -> Result<(), StateError> {
        let path = self.resolve(ref_name)?;
        let parent = path
            .parent()
            .ok_or_else(|| StateError::InvalidKey(ref_name.to_string()))?;

        fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| StateError::io(parent, e))?;
        temp.write_all(target.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| StateError::io(temp.path(), e))?;

        temp.persist(&path)
            .map_err(|e| StateError::io(&path, e.error))?;

        Ok(())
    }

    /// True when the stored target for `ref_name` equals `target`.
    pub fn is_published(&self, ref_name: &str, target: &str) -> Result<bool, StateError> {
        Ok(self
            .get(ref_name)?
            .is_some_and(|record| record.last_published_target == target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.get("refs/heads/main").unwrap().is_none());
    }

    #[test]
    fn test_put_creates_nested_record() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state"));

        store.put("refs/heads/feature/x", "abc123").unwrap();

        let path = dir.path().join("state/refs/heads/feature/x");
        assert_eq!(fs::read_to_string(path).unwrap(), "abc123");
        assert_eq!(
            store.get("refs/heads/feature/x").unwrap(),
            Some(BuildRecord {
                ref_name: "refs/heads/feature/x".to_string(),
                last_published_target: "abc123".to_string(),
            })
        );
    }

    #[test]
    fn test_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        store.put("refs/tags/v1", "aaa").unwrap();
        store.put("refs/tags/v1", "bbb").unwrap();

        assert!(store.is_published("refs/tags/v1", "bbb").unwrap());
        assert!(!store.is_published("refs/tags/v1", "aaa").unwrap());

        // Only the record itself remains; no temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path().join("refs/tags"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("v1")]);
    }

    #[test]
    fn test_trailing_newline_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("refs/heads/main"), "abc123\n").unwrap();

        let store = StateStore::new(dir.path());
        assert!(store.is_published("refs/heads/main", "abc123").unwrap());
    }

    #[test]
    fn test_escaping_names_are_rejected() {
        let store = StateStore::new("/tmp/state");
        for name in ["", "/etc/passwd", "refs/../../x", "refs//x", "refs/./x", "refs/heads/"] {
            assert!(
                matches!(store.resolve(name), Err(StateError::InvalidKey(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_scoped_store() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let scoped = store.scoped("hello").unwrap();

        scoped.put("refs/heads/main", "abc").unwrap();

        assert!(dir.path().join("hello/refs/heads/main").exists());
        assert!(store.get("refs/heads/main").unwrap().is_none());
        assert!(store.scoped("a/b").is_err());
        assert!(store.scoped("..").is_err());
    }
}
