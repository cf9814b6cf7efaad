//! One JSON file per person holding their face embedding.
//!
//! Files are named `<id>.json`. Anything else in the directory is ignored.

use crate::StoreError;
use infoengine_core::Embedding;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

pub struct EmbeddingStore {
    dir: PathBuf,
}

impl EmbeddingStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Write the embedding for `id`, replacing any previous one.
    ///
    /// Writes a sibling temp file and renames it over the target, so a
    /// reader never sees a half-written embedding. JSON has no NaN or
    /// infinity, so vectors holding either are refused and nothing is written.
    pub fn put(&self, id: i64, embedding: &Embedding) -> Result<(), StoreError> {
        if let Some(index) = embedding.values.iter().position(|v| !v.is_finite()) {
            return Err(StoreError::NonFinite { id, index });
        }

        let path = self.path_for(id);
        let tmp = self.dir.join(format!(".{id}.{EXTENSION}.tmp"));

        let bytes = serde_json::to_vec(embedding)
            .map_err(|e| StoreError::Serialize { path: path.clone(), source: e })?;
        std::fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::io(&path, e)
        })?;

        tracing::debug!(id, dims = embedding.values.len(), "embedding stored");
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<Embedding>, StoreError> {
        let path = self.path_for(id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let embedding = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialize { path, source: e })?;
        Ok(Some(embedding))
    }

    /// Remove the embedding for `id`. Returns whether a file existed.
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Ids of every stored embedding, ascending.
    pub fn list_ids(&self) -> Result<Vec<i64>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.list_ids()?.len())
    }
}
