//! Error types for the job engine.

use std::time::Duration;
use thiserror::Error;

/// Job engine operation result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Job engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Enqueue called before `start`.
    #[error("job engine not started")]
    NotStarted,

    /// Enqueue called after `stop`.
    #[error("job engine stopped")]
    Stopped,

    /// The queue receiver is gone; the engine is shutting down.
    #[error("job queue closed")]
    QueueClosed,

    /// The worker did not finish within the stop timeout. The in-flight
    /// job keeps running detached; the caller decides whether to force-exit.
    #[error("stop timed out after {0:?}")]
    StopTimeout(Duration),

    /// Persistence failure from the state store.
    #[error(transparent)]
    Store(#[from] veranda_store::StoreError),

    /// Payload could not be encoded.
    #[error(transparent)]
    Payload(#[from] veranda_protocol::PayloadError),
}
