//! The on-disk snapshot document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use veranda_protocol::{AuditLog, Job, Session, Site, User};

/// Version of the snapshot document this build reads and writes. A file
/// with any other version is rejected at load time.
pub const SCHEMA_VERSION: u32 = 1;

/// Full in-memory representation of all persisted entities, serialized as
/// one JSON document. The `username_index` and `domain_index` maps are
/// derived data: they are persisted for inspection but always rebuilt from
/// the primary maps on load.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub schema_version: u32,
    pub users: HashMap<String, User>,
    pub sessions: HashMap<String, Session>,
    pub sites: HashMap<String, Site>,
    pub jobs: HashMap<String, Job>,
    pub audit_logs: Vec<AuditLog>,
    pub audit_sequence: i64,
    #[serde(default)]
    pub username_index: HashMap<String, String>,
    #[serde(default)]
    pub domain_index: HashMap<String, String>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            users: HashMap::new(),
            sessions: HashMap::new(),
            sites: HashMap::new(),
            jobs: HashMap::new(),
            audit_logs: Vec::new(),
            audit_sequence: 0,
            username_index: HashMap::new(),
            domain_index: HashMap::new(),
        }
    }

    /// Recompute the secondary indexes from the primary maps. Stale index
    /// entries from an old file are discarded wholesale.
    pub fn rebuild_indexes(&mut self) {
        self.username_index = self
            .users
            .iter()
            .map(|(id, user)| (user.username.to_lowercase(), id.clone()))
            .collect();
        self.domain_index = self
            .sites
            .iter()
            .map(|(id, site)| (site.domain.to_lowercase(), id.clone()))
            .collect();
    }
}
