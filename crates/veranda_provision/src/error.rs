//! Error types for the provisioner.

use thiserror::Error;

/// Provisioning operation result type.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Provisioning errors.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Site validation failed before anything touched the filesystem.
    #[error("site domain is empty")]
    EmptyDomain,

    #[error("site root_path is empty")]
    EmptyRoot,

    /// A configured command string contained no tokens.
    #[error("empty command")]
    EmptyCommand,

    /// An external command ran and reported failure.
    #[error("{command}: {detail}")]
    CommandFailed { command: String, detail: String },

    /// An external command exceeded the configured timeout and was killed.
    #[error("{command}: timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    /// Filesystem error, tagged with the step that produced it.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}
