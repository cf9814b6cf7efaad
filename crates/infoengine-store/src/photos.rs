//! Enrollment photos, stored as `<id>_<original file name>`.
//!
//! There is no index: a person's photo is found by scanning for the
//! `<id>_` prefix.

use crate::StoreError;
use std::path::{Path, PathBuf};

pub struct PhotoStore {
    dir: PathBuf,
}

impl PhotoStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` into the store for `id` and return the stored path.
    pub fn put(&self, id: i64, source: &Path) -> Result<PathBuf, StoreError> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidPhotoName(source.to_path_buf()))?;

        let target = self.dir.join(format!("{id}_{file_name}"));
        std::fs::copy(source, &target).map_err(|e| StoreError::io(source, e))?;

        tracing::debug!(id, path = %target.display(), "photo stored");
        Ok(target)
    }

    /// The stored photo for `id`, if any. The lexicographically first wins
    /// when several share the prefix.
    pub fn find(&self, id: i64) -> Result<Option<PathBuf>, StoreError> {
        Ok(self.matching(id)?.into_iter().next())
    }

    /// Delete every photo for `id`. Returns how many were removed.
    pub fn delete(&self, id: i64) -> Result<usize, StoreError> {
        let paths = self.matching(id)?;
        for path in &paths {
            std::fs::remove_file(path).map_err(|e| StoreError::io(path, e))?;
        }
        Ok(paths.len())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let mut n = 0;
        for entry in self.entries()? {
            if id_prefix(&entry).is_some() {
                n += 1;
            }
        }
        Ok(n)
    }

    fn matching(&self, id: i64) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths: Vec<PathBuf> = self
            .entries()?
            .into_iter()
            .filter(|p| id_prefix(p) == Some(id))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn entries(&self) -> Result<Vec<PathBuf>, StoreError> {
        let read = std::fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut paths = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

/// Parse the `<id>_` prefix of a stored photo's file name.
fn id_prefix(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let (id, _) = name.split_once('_')?;
    id.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PhotoStore, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::open(dir.path().join("photos")).unwrap();
        let source = dir.path().join("portrait_front.jpg");
        std::fs::write(&source, b"jpeg bytes").unwrap();
        (dir, store, source)
    }

    #[test]
    fn test_put_names_file_with_id_prefix() {
        let (_dir, store, source) = setup();
        let stored = store.put(7, &source).unwrap();

        assert_eq!(stored.file_name().unwrap(), "7_portrait_front.jpg");
        assert_eq!(std::fs::read(&stored).unwrap(), b"jpeg bytes");
        assert!(source.exists());
    }

    #[test]
    fn test_find_does_not_confuse_prefixes() {
        let (_dir, store, source) = setup();
        store.put(11, &source).unwrap();

        assert!(store.find(1).unwrap().is_none());
        assert!(store.find(11).unwrap().is_some());
    }

    #[test]
    fn test_delete_removes_all_for_id() {
        let (_dir, store, source) = setup();
        store.put(3, &source).unwrap();
        std::fs::write(store.dir().join("3_other.png"), b"x").unwrap();
        store.put(4, &source).unwrap();

        assert_eq!(store.delete(3).unwrap(), 2);
        assert_eq!(store.delete(3).unwrap(), 0);
        assert!(store.find(4).unwrap().is_some());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_put_missing_source_fails() {
        let (dir, store, _) = setup();
        let missing = dir.path().join("missing.jpg");
        assert!(matches!(store.put(1, &missing), Err(StoreError::Io { .. })));
        assert_eq!(store.count().unwrap(), 0);
    }
}
