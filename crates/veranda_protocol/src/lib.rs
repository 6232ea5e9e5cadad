//! Veranda protocol crate: canonical entity types and enums.
//!
//! Every crate in the workspace speaks these types; nothing here touches the
//! filesystem or the network.

pub mod defaults;
pub mod types;

pub use types::{
    AuditLog, Job, JobKind, JobRequest, JobStatus, PayloadError, Role, Session, Site,
    SiteProvisioner, SiteRuntime, SiteStatus, User,
};
