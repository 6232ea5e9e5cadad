//! Nginx virtual-host provisioning.
//!
//! A provision call publishes a config file and its enabled symlink as one
//! unit, validates the result against the running server, and restores the
//! previous on-disk state when any step after the first write fails. The
//! live, reloaded configuration is never left syntactically broken.

pub mod error;
mod nginx;
mod rollback;

pub use error::{ProvisionError, Result};
pub use nginx::{NginxProvisioner, ProvisionConfig};
