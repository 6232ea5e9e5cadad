//! File-backed snapshot repository.
//!
//! Design:
//! - One `RwLock` guards the whole snapshot; readers run concurrently,
//!   every writer is exclusive.
//! - Writers mutate the in-memory snapshot (primary map + index together),
//!   then persist before returning. A failed persist surfaces as an error
//!   even though memory already changed; the next successful persist
//!   reconciles the file.
//! - Persisting writes the full document to `<path>.tmp` and renames it
//!   over `<path>`. The rename is the crash-safety boundary: the file is
//!   observed either fully old or fully new, never partial.

use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use veranda_ids::{JobId, SiteId, UserId};
use veranda_protocol::{AuditLog, Job, JobStatus, Session, Site, SiteStatus, User};

use crate::error::{Result, StoreError};
use crate::snapshot::{Snapshot, SCHEMA_VERSION};

/// Single source of truth for all persisted panel entities.
pub struct StateStore {
    path: PathBuf,
    data: RwLock<Snapshot>,
}

impl StateStore {
    /// Open the snapshot at `path`, creating an empty one when the file
    /// does not exist yet. A snapshot written by a different schema version
    /// is rejected outright.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty state path",
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let snapshot = match fs::read(&path) {
            Ok(raw) => {
                let mut snap: Snapshot = serde_json::from_slice(&raw)?;
                if snap.schema_version != SCHEMA_VERSION {
                    return Err(StoreError::SchemaVersion(snap.schema_version));
                }
                snap.rebuild_indexes();
                snap
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let snap = Snapshot::empty();
                persist(&path, &snap)?;
                snap
            }
            Err(err) => return Err(err.into()),
        };

        debug!(
            "state store opened: {} ({} sites, {} jobs)",
            path.display(),
            snapshot.sites.len(),
            snapshot.jobs.len()
        );

        Ok(Self {
            path,
            data: RwLock::new(snapshot),
        })
    }

    /// Path of the backing snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the current snapshot one final time.
    pub fn close(&self) -> Result<()> {
        let data = self.data.write().unwrap();
        persist(&self.path, &data)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn count_users(&self) -> usize {
        self.data.read().unwrap().users.len()
    }

    /// Insert a new user. Usernames are unique case-insensitively; a
    /// collision is rejected without mutating state.
    pub fn create_user(&self, user: User) -> Result<()> {
        let mut data = self.data.write().unwrap();
        let username_key = user.username.to_lowercase();
        if data.username_index.contains_key(&username_key) {
            return Err(StoreError::Conflict);
        }
        data.username_index
            .insert(username_key, user.id.as_str().to_string());
        data.users.insert(user.id.as_str().to_string(), user);
        persist(&self.path, &data)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        let data = self.data.read().unwrap();
        let id = data
            .username_index
            .get(&username.to_lowercase())
            .ok_or(StoreError::NotFound)?;
        data.users.get(id).cloned().ok_or(StoreError::NotFound)
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        let data = self.data.read().unwrap();
        data.users
            .get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    pub fn update_user_password(
        &self,
        id: &UserId,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut data = self.data.write().unwrap();
        let user = data.users.get_mut(id.as_str()).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = updated_at;
        persist(&self.path, &data)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn create_session(&self, session: Session) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.sessions.insert(session.token_hash.clone(), session);
        persist(&self.path, &data)
    }

    pub fn get_session_by_token_hash(&self, token_hash: &str) -> Result<Session> {
        let data = self.data.read().unwrap();
        data.sessions
            .get(token_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Remove a session. Deleting an absent session is not an error.
    pub fn delete_session_by_token_hash(&self, token_hash: &str) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.sessions.remove(token_hash);
        persist(&self.path, &data)
    }

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    /// Insert a new site. Domains are unique case-insensitively; a
    /// collision is rejected without mutating state.
    pub fn create_site(&self, site: Site) -> Result<()> {
        let mut data = self.data.write().unwrap();
        let domain_key = site.domain.to_lowercase();
        if data.domain_index.contains_key(&domain_key) {
            return Err(StoreError::Conflict);
        }
        data.domain_index
            .insert(domain_key, site.id.as_str().to_string());
        data.sites.insert(site.id.as_str().to_string(), site);
        persist(&self.path, &data)
    }

    /// List sites newest-first. A `limit` of zero means no cap.
    pub fn list_sites(&self, limit: usize) -> Vec<Site> {
        let data = self.data.read().unwrap();
        let mut sites: Vec<Site> = data.sites.values().cloned().collect();
        sites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if limit > 0 && sites.len() > limit {
            sites.truncate(limit);
        }
        sites
    }

    pub fn get_site(&self, id: &SiteId) -> Result<Site> {
        let data = self.data.read().unwrap();
        data.sites
            .get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    pub fn get_site_by_domain(&self, domain: &str) -> Result<Site> {
        let data = self.data.read().unwrap();
        let id = data
            .domain_index
            .get(&domain.to_lowercase())
            .ok_or(StoreError::NotFound)?;
        data.sites.get(id).cloned().ok_or(StoreError::NotFound)
    }

    pub fn update_site_status(&self, id: &SiteId, status: SiteStatus) -> Result<()> {
        let mut data = self.data.write().unwrap();
        let site = data.sites.get_mut(id.as_str()).ok_or(StoreError::NotFound)?;
        site.status = status;
        site.updated_at = Utc::now();
        persist(&self.path, &data)
    }

    /// Delete a site record and its domain index entry.
    pub fn delete_site(&self, id: &SiteId) -> Result<()> {
        let mut data = self.data.write().unwrap();
        let site = data.sites.remove(id.as_str()).ok_or(StoreError::NotFound)?;
        data.domain_index.remove(&site.domain.to_lowercase());
        persist(&self.path, &data)
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub fn create_job(&self, job: Job) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.jobs.insert(job.id.as_str().to_string(), job);
        persist(&self.path, &data)
    }

    /// List jobs newest-first. A `limit` of zero means no cap.
    pub fn list_jobs(&self, limit: usize) -> Vec<Job> {
        let data = self.data.read().unwrap();
        let mut jobs: Vec<Job> = data.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if limit > 0 && jobs.len() > limit {
            jobs.truncate(limit);
        }
        jobs
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job> {
        let data = self.data.read().unwrap();
        data.jobs
            .get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Update a job's progress. The payload, creation timestamp, and actor
    /// are immutable after creation and deliberately not touched here.
    pub fn update_job(
        &self,
        id: &JobId,
        status: JobStatus,
        error: &str,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut data = self.data.write().unwrap();
        let job = data.jobs.get_mut(id.as_str()).ok_or(StoreError::NotFound)?;
        job.status = status;
        job.error = error.to_string();
        job.started_at = started_at;
        job.finished_at = finished_at;
        persist(&self.path, &data)
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Append an audit entry; the store assigns its id from the monotonic
    /// audit sequence.
    pub fn append_audit_log(&self, mut entry: AuditLog) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.audit_sequence += 1;
        entry.id = data.audit_sequence;
        data.audit_logs.push(entry);
        persist(&self.path, &data)
    }

    /// List the most recent audit entries, newest-first.
    pub fn list_audit_logs(&self, limit: usize) -> Vec<AuditLog> {
        let data = self.data.read().unwrap();
        let size = data.audit_logs.len();
        let cap = if limit == 0 || limit > size { size } else { limit };
        data.audit_logs.iter().rev().take(cap).cloned().collect()
    }
}

/// Serialize the snapshot and atomically replace the file on disk.
fn persist(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let raw = serde_json::to_vec_pretty(snapshot)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, raw)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
