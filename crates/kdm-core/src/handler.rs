//! ---
//! kdm_section: "04-deployment-orchestration"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Tenant-scoped kernel deployment contract."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::path::Path;

use async_trait::async_trait;
use kdm_common::{BuildVersion, TenantId};

use crate::HandlerResult;

/// Tenant-scoped kernel deployment lifecycle contract.
///
/// Implemented by orchestration backends. Mutating operations return
/// `Ok(true)` when a change was applied and `Ok(false)` for an accepted
/// no-op (for example scaling to the current replica count); queries
/// return typed values and fail when the tenant has no deployment.
///
/// A tenant runs at most one build version at a time. `roll_update` and
/// `roll_back` replace the running version in place, restarting replicas
/// one at a time so two builds never serve simultaneously.
#[async_trait]
pub trait KernelHandler: Send + Sync {
    /// Deploy a kernel build for the tenant with the requested replica count.
    ///
    /// Imports the artifact at `kernel_path` into the repository, allocates
    /// one service endpoint per replica, and starts replica supervision.
    /// Returns `Ok(false)` without touching anything when the tenant already
    /// has an active deployment.
    async fn deploy(
        &self,
        tenant: &TenantId,
        kernel_path: &Path,
        build_version: &BuildVersion,
        replicas: u32,
    ) -> HandlerResult<bool>;

    /// Replace the tenant's running build with `build_version`.
    ///
    /// The replica count is preserved and replicas restart one at a time.
    /// Returns `Ok(false)` when the requested version is already running.
    async fn roll_update(
        &self,
        tenant: &TenantId,
        kernel_path: &Path,
        build_version: &BuildVersion,
    ) -> HandlerResult<bool>;

    /// Roll the tenant back from `running_version` to the strictly lower
    /// `target_version`, which must already exist in the repository.
    async fn roll_back(
        &self,
        tenant: &TenantId,
        running_version: &BuildVersion,
        target_version: &BuildVersion,
    ) -> HandlerResult<bool>;

    /// Adjust the tenant's replica count, growing or shrinking the
    /// endpoint set to match. Returns `Ok(false)` when already at `replicas`.
    async fn scale(&self, tenant: &TenantId, replicas: u32) -> HandlerResult<bool>;

    /// Tear down the tenant's deployment: stop all replicas and drop the
    /// deployment record. Subsequent queries for the tenant fail.
    async fn remove(&self, tenant: &TenantId) -> HandlerResult<bool>;

    /// Number of replicas currently maintained for the tenant.
    async fn replica_count(&self, tenant: &TenantId) -> HandlerResult<u32>;

    /// Human-readable summary of every service access endpoint exposed by
    /// the tenant's replicas.
    async fn service_access_ips(&self, tenant: &TenantId) -> HandlerResult<String>;

    /// All build versions stored in the repository for the tenant that fall
    /// under `build_version`, ascending release order.
    async fn list_existing_build_artifacts(
        &self,
        tenant: &TenantId,
        build_version: &BuildVersion,
    ) -> HandlerResult<Vec<BuildVersion>>;

    /// The subset of [`Self::list_existing_build_artifacts`] ordered
    /// strictly below the tenant's currently running version.
    async fn list_lower_build_artifact_versions(
        &self,
        tenant: &TenantId,
        build_version: &BuildVersion,
    ) -> HandlerResult<Vec<BuildVersion>>;
}
