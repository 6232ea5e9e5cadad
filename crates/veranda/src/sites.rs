//! Site service: validation and create/delete orchestration.
//!
//! Sits between the CLI and the core pipeline: validates input, persists
//! the site record, and enqueues the provisioning job. When the enqueue
//! itself fails the site is marked failed so it never sits in
//! `provisioning` with no job behind it.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use veranda_ids::{SiteId, UserId};
use veranda_jobs::{EngineError, JobEngine};
use veranda_protocol::{Job, JobRequest, Site, SiteRuntime, SiteStatus};
use veranda_store::{StateStore, StoreError};

/// Site service errors. Validation and conflict errors are rejected before
/// any state changes.
#[derive(Error, Debug)]
pub enum SiteError {
    #[error("invalid domain")]
    InvalidDomain,

    #[error("invalid root_path")]
    InvalidRoot,

    #[error("invalid runtime: {0}")]
    InvalidRuntime(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct CreateSiteInput {
    pub domain: String,
    pub root_path: String,
    pub runtime: String,
}

pub struct SiteService {
    store: Arc<StateStore>,
    engine: Arc<JobEngine>,
}

impl SiteService {
    pub fn new(store: Arc<StateStore>, engine: Arc<JobEngine>) -> Self {
        Self { store, engine }
    }

    /// Validate and persist a new site, then enqueue its provision job.
    /// Returns the created site (status `provisioning`) and the queued job.
    pub async fn create_site(
        &self,
        actor: &UserId,
        input: CreateSiteInput,
    ) -> Result<(Site, Job), SiteError> {
        let domain = normalize_domain(&input.domain);
        if !is_valid_domain(&domain) {
            return Err(SiteError::InvalidDomain);
        }
        let root_path = input.root_path.trim().to_string();
        if !is_valid_root_path(&root_path) {
            return Err(SiteError::InvalidRoot);
        }
        let runtime: SiteRuntime = input
            .runtime
            .parse()
            .map_err(|_| SiteError::InvalidRuntime(input.runtime.clone()))?;

        let now = Utc::now();
        let site = Site {
            id: SiteId::new(),
            domain,
            root_path,
            runtime,
            status: SiteStatus::Provisioning,
            created_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.create_site(site.clone())?;

        match self
            .engine
            .enqueue(
                actor,
                JobRequest::ProvisionSite {
                    site_id: site.id.clone(),
                },
            )
            .await
        {
            Ok(job) => Ok((site, job)),
            Err(err) => {
                let _ = self.store.update_site_status(&site.id, SiteStatus::Failed);
                Err(err.into())
            }
        }
    }

    /// Mark a site `deleting` and enqueue its deprovision job. The record
    /// itself is deleted by the worker once deprovisioning succeeds.
    pub async fn delete_site(&self, actor: &UserId, id: &SiteId) -> Result<Job, SiteError> {
        let site = self.store.get_site(id)?;
        self.store
            .update_site_status(&site.id, SiteStatus::Deleting)?;

        match self
            .engine
            .enqueue(
                actor,
                JobRequest::DeprovisionSite {
                    site_id: site.id.clone(),
                },
            )
            .await
        {
            Ok(job) => Ok(job),
            Err(err) => {
                let _ = self.store.update_site_status(&site.id, SiteStatus::Failed);
                Err(err.into())
            }
        }
    }

    pub fn list_sites(&self, limit: usize) -> Vec<Site> {
        self.store.list_sites(limit)
    }

    pub fn get_site(&self, id: &SiteId) -> Result<Site, SiteError> {
        self.store.get_site(id).map_err(Into::into)
    }

    /// Resolve a CLI-supplied site key: tries the id first, then the
    /// domain index.
    pub fn resolve_site(&self, key: &str) -> Result<Site, SiteError> {
        if let Ok(id) = SiteId::parse(key) {
            if let Ok(site) = self.store.get_site(&id) {
                return Ok(site);
            }
        }
        self.store.get_site_by_domain(key).map_err(Into::into)
    }
}

fn normalize_domain(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_lowercase()
}

fn is_valid_domain(domain: &str) -> bool {
    if domain.len() < 3 || domain.len() > 253 {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return false;
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    labels
        .iter()
        .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
}

fn is_valid_root_path(root_path: &str) -> bool {
    if root_path.is_empty() || !root_path.starts_with('/') || root_path == "/" {
        return false;
    }
    !root_path.split('/').any(|segment| segment == "..")
}
