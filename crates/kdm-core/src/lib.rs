//! ---
//! kdm_section: "04-deployment-orchestration"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Deployment lifecycle contract and local orchestration backend."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
#![warn(missing_docs)]

use kdm_artifacts::ArtifactError;
use kdm_store::StoreError;

pub mod endpoints;
pub mod handler;
pub mod local;
pub mod runtime;

pub use endpoints::EndpointAllocator;
pub use handler::KernelHandler;
pub use local::LocalKernelHandler;
pub use runtime::ReplicaSupervisor;

/// Result alias used by every contract operation.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// The single error type surfaced by [`KernelHandler`] operations.
///
/// Callers treat any variant as "the operation failed"; the variants
/// exist so operators can tell an unknown tenant from a bad rollback
/// target without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The tenant has no active kernel deployment.
    #[error("tenant {0} has no active kernel deployment")]
    TenantNotDeployed(String),
    /// The caller-supplied running version does not match the record.
    #[error("tenant {tenant} runs build {running}, not {reported}")]
    VersionMismatch {
        /// Tenant the operation targeted.
        tenant: String,
        /// Version the deployment record holds.
        running: String,
        /// Version the caller claimed was running.
        reported: String,
    },
    /// Rollback target is not ordered below the running version.
    #[error("build {target} does not precede running build {running} for tenant {tenant}")]
    NotLowerVersion {
        /// Tenant the operation targeted.
        tenant: String,
        /// Version currently running.
        running: String,
        /// Requested rollback target.
        target: String,
    },
    /// The request itself is malformed (bad tenant name, replica bounds).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Failure in the artifact repository.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Failure in the deployment state store.
    #[error(transparent)]
    Store(#[from] StoreError),
}
