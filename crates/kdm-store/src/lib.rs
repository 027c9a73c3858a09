//! ---
//! kdm_section: "03-persistence-logging"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Deployment state persistence abstractions."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
#![warn(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kdm_common::{BuildVersion, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod event_log;
mod file;
mod memory;

pub use event_log::{replay as replay_event_log, EventLogEntry, EventLogReader, EventLogWriter};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing state files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when inserting a tenant that already holds a deployment.
    #[error("tenant {0} already has a deployment record")]
    TenantExists(String),
    /// Reported when a tenant has no deployment record.
    #[error("no deployment record for tenant {0}")]
    TenantMissing(String),
    /// Reported when an event log file fails header validation.
    #[error("event log header corrupt in {0}")]
    CorruptEventLog(PathBuf),
}

/// Lifecycle state of a tenant deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Record created, replicas not yet running.
    Pending,
    /// Deployment is live.
    Active,
    /// Deployment was torn down.
    Removed,
}

impl DeploymentState {
    /// State name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted description of a tenant's kernel deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique identifier assigned at creation.
    pub id: Uuid,
    /// Tenant owning the deployment.
    pub tenant: TenantId,
    /// Currently active build version.
    pub build_version: BuildVersion,
    /// Repository path of the active kernel artifact.
    pub kernel_path: PathBuf,
    /// SHA-256 digest of the active artifact.
    pub artifact_digest: String,
    /// Desired replica count.
    pub replicas: u32,
    /// Service access endpoints, one per replica.
    pub endpoints: Vec<String>,
    /// Lifecycle state.
    pub state: DeploymentState,
    /// Previously active build versions, oldest first.
    #[serde(default)]
    pub history: Vec<BuildVersion>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a fresh pending record for a tenant.
    #[must_use]
    pub fn new(
        tenant: TenantId,
        build_version: BuildVersion,
        kernel_path: PathBuf,
        artifact_digest: String,
        replicas: u32,
        endpoints: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant,
            build_version,
            kernel_path,
            artifact_digest,
            replicas,
            endpoints,
            state: DeploymentState::Pending,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the updated-at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Backend for storing per-tenant deployment records.
///
/// A tenant holds at most one record at a time; implementations key
/// records by tenant.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a record for a tenant that has none yet.
    async fn insert(&self, record: &DeploymentRecord) -> Result<()>;

    /// Fetch a tenant's record, if any.
    async fn get(&self, tenant: &TenantId) -> Result<Option<DeploymentRecord>>;

    /// Replace a tenant's record. Fails when the tenant is unknown.
    async fn update(&self, record: &DeploymentRecord) -> Result<()>;

    /// Remove and return a tenant's record. Fails when the tenant is unknown.
    async fn remove(&self, tenant: &TenantId) -> Result<DeploymentRecord>;

    /// All records, ordered by creation time ascending.
    async fn list(&self) -> Result<Vec<DeploymentRecord>>;
}
