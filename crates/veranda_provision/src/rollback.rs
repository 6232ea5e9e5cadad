//! Reverse-order compensation for partially applied filesystem changes.
//!
//! Before a transaction touches an artifact it registers a compensation
//! capturing the artifact's prior state: `(previous, existed)`. On failure
//! the plan runs the compensations in reverse registration order. Failures
//! inside a compensation are logged and never mask the root cause.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use crate::error::{ProvisionError, Result};
use crate::nginx::{remove_if_exists, write_atomic};

/// One captured artifact state, restorable after a failed transaction.
#[derive(Debug)]
pub(crate) enum Compensation {
    /// Restore a regular file to its previous content, or remove it when it
    /// did not exist before the transaction.
    RestoreFile {
        path: PathBuf,
        previous: Option<Vec<u8>>,
    },
    /// Restore a symlink to its previous target, or remove it when it did
    /// not exist before the transaction.
    RestoreSymlink {
        path: PathBuf,
        previous: Option<PathBuf>,
    },
}

impl Compensation {
    pub fn restore_file(path: &Path, previous: Option<Vec<u8>>) -> Self {
        Self::RestoreFile {
            path: path.to_path_buf(),
            previous,
        }
    }

    pub fn restore_symlink(path: &Path, previous: Option<PathBuf>) -> Self {
        Self::RestoreSymlink {
            path: path.to_path_buf(),
            previous,
        }
    }

    async fn apply(&self) -> Result<()> {
        match self {
            Compensation::RestoreFile {
                path,
                previous: Some(content),
            } => write_atomic(path, content).await,
            Compensation::RestoreFile {
                path,
                previous: None,
            } => remove_if_exists(path).await,
            Compensation::RestoreSymlink { path, previous } => {
                remove_if_exists(path).await?;
                if let Some(target) = previous {
                    fs::symlink(target, path)
                        .await
                        .map_err(|err| ProvisionError::io("restore symlink", err))?;
                }
                Ok(())
            }
        }
    }
}

/// Ordered list of compensations for one provisioning transaction.
#[derive(Debug, Default)]
pub(crate) struct RollbackPlan {
    steps: Vec<Compensation>,
}

impl RollbackPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// Execute all compensations in reverse registration order. Individual
    /// failures are logged; the remaining steps still run.
    pub async fn run(self) {
        for step in self.steps.into_iter().rev() {
            if let Err(err) = step.apply().await {
                warn!("rollback step failed: {err} ({step:?})");
            }
        }
    }
}
