//! Veranda state store (panel persistence).
//!
//! A mutex-guarded, file-backed snapshot repository holding every persisted
//! entity. Each mutation rewrites the full snapshot to disk before the call
//! returns; write-temp-then-rename keeps the file crash-safe.

pub mod error;
mod snapshot;
mod store;

pub use error::{Result, StoreError};
pub use snapshot::SCHEMA_VERSION;
pub use store::StateStore;
