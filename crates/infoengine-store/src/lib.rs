//! infoengine-store — Durable state for enrolled people.
//!
//! Three independent stores keyed by person id: the SQLite person
//! registry, one embedding file per person and one photo file per person.

pub mod embeddings;
pub mod photos;
pub mod registry;

pub use embeddings::EmbeddingStore;
pub use photos::PhotoStore;
pub use registry::{Person, PersonRegistry};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} must not be empty")]
    Validation(&'static str),
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("embedding file {path}: {source}")]
    Serialize {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("embedding for id {id} has a non-finite value at index {index}")]
    NonFinite { id: i64, index: usize },
    #[error("photo source has no file name: {0}")]
    InvalidPhotoName(std::path::PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}
