//! Error types for the state store.

use thiserror::Error;

/// State store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// State store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity does not exist.
    #[error("not found")]
    NotFound,

    /// Uniqueness violation (duplicate username or domain).
    #[error("conflict")]
    Conflict,

    /// Snapshot file was written by an incompatible schema. There is no
    /// silent migration; the caller has to deal with the file explicitly.
    #[error("unsupported schema version: {0}")]
    SchemaVersion(u32),

    /// IO error while reading or persisting the snapshot.
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding/decoding error.
    #[error("state encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}
