//! Canonical entity types and enums.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use veranda_ids::{JobId, SiteId, UserId};

// ============================================================================
// Canonical Enums (used across all crates)
// ============================================================================

/// User role. The panel only distinguishes administrators from regular users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Site lifecycle status.
///
/// Provisioning path: `provisioning -> active | failed`.
/// Removal path: `active -> deleting`, then the record is deleted outright
/// on success or marked `failed` and retained on error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Provisioning,
    Active,
    Failed,
    Deleting,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Provisioning => "provisioning",
            SiteStatus::Active => "active",
            SiteStatus::Failed => "failed",
            SiteStatus::Deleting => "deleting",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provisioning" => Ok(SiteStatus::Provisioning),
            "active" => Ok(SiteStatus::Active),
            "failed" => Ok(SiteStatus::Failed),
            "deleting" => Ok(SiteStatus::Deleting),
            _ => Err(format!("Invalid site status: '{}'", s)),
        }
    }
}

/// Web runtime served by a site's virtual host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteRuntime {
    Php,
    Node,
    Python,
    Static,
}

impl SiteRuntime {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteRuntime::Php => "php",
            SiteRuntime::Node => "node",
            SiteRuntime::Python => "python",
            SiteRuntime::Static => "static",
        }
    }
}

impl fmt::Display for SiteRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SiteRuntime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "php" => Ok(SiteRuntime::Php),
            "node" => Ok(SiteRuntime::Node),
            "python" => Ok(SiteRuntime::Python),
            "static" => Ok(SiteRuntime::Static),
            _ => Err(format!(
                "Invalid runtime: '{}'. Expected: php, node, python, or static",
                s
            )),
        }
    }
}

/// Job lifecycle status: `queued -> running -> success | failed`.
/// `success` and `failed` are terminal; a failed job is never retried and
/// must be re-enqueued as a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: '{}'", s)),
        }
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProvisionSite,
    DeprovisionSite,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ProvisionSite => "provision_site",
            JobKind::DeprovisionSite => "deprovision_site",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provision_site" => Ok(JobKind::ProvisionSite),
            "deprovision_site" => Ok(JobKind::DeprovisionSite),
            _ => Err(format!("Invalid job kind: '{}'", s)),
        }
    }
}

// ============================================================================
// Persisted Entities
// ============================================================================

/// A panel user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A login session, keyed by the hash of its bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token_hash: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A hosted web site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    /// Unique across the panel, compared case-insensitively.
    pub domain: String,
    pub root_path: String,
    pub runtime: SiteRuntime,
    pub status: SiteStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A durable unit of asynchronous work.
///
/// The payload is a JSON string map, immutable after creation; `error` is
/// only set when the job fails. Status is mutated exclusively by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: String,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub triggered_by: UserId,
}

/// One append-only audit trail entry. Ids are assigned from the store's
/// monotonic audit sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub actor_user: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Typed Job Requests
// ============================================================================

/// Error raised when a stored job payload cannot be decoded.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("missing {0} in payload")]
    MissingField(&'static str),
}

/// Typed job request union.
///
/// Jobs persist their payload as a JSON string map; this union is the
/// in-process representation, encoded at enqueue time and decoded again
/// right before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    ProvisionSite { site_id: SiteId },
    DeprovisionSite { site_id: SiteId },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::ProvisionSite { .. } => JobKind::ProvisionSite,
            JobRequest::DeprovisionSite { .. } => JobKind::DeprovisionSite,
        }
    }

    pub fn site_id(&self) -> &SiteId {
        match self {
            JobRequest::ProvisionSite { site_id } => site_id,
            JobRequest::DeprovisionSite { site_id } => site_id,
        }
    }

    /// Encode into the string-map payload stored on the job record.
    pub fn encode_payload(&self) -> Result<String, PayloadError> {
        let mut fields = BTreeMap::new();
        fields.insert("site_id", self.site_id().as_str());
        Ok(serde_json::to_string(&fields)?)
    }

    /// Decode a stored payload back into a typed request. Missing required
    /// keys are a payload error, not a panic; the worker turns them into a
    /// failed job.
    pub fn decode(kind: JobKind, payload: &str) -> Result<Self, PayloadError> {
        let fields: BTreeMap<String, String> = serde_json::from_str(payload)?;
        let site_id = fields
            .get("site_id")
            .filter(|value| !value.trim().is_empty())
            .ok_or(PayloadError::MissingField("site_id"))?;
        let site_id =
            SiteId::parse(site_id).map_err(|_| PayloadError::MissingField("site_id"))?;
        Ok(match kind {
            JobKind::ProvisionSite => JobRequest::ProvisionSite { site_id },
            JobKind::DeprovisionSite => JobRequest::DeprovisionSite { site_id },
        })
    }
}

// ============================================================================
// Capability Seams
// ============================================================================

/// Capability used by the job engine to apply a site's desired state to the
/// web server. Implementations must leave the live configuration untouched
/// when they fail.
#[async_trait]
pub trait SiteProvisioner: Send + Sync {
    async fn provision_site(&self, site: &Site) -> anyhow::Result<()>;
    async fn deprovision_site(&self, site: &Site) -> anyhow::Result<()>;
}
