//! ---
//! kdm_section: "04-deployment-orchestration"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "In-process orchestration backend for tenant kernels."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kdm_artifacts::ArtifactRepository;
use kdm_common::config::AppConfig;
use kdm_common::{BuildVersion, TenantId};
use kdm_store::{
    DeploymentRecord, DeploymentState, DeploymentStore, EventLogEntry, EventLogWriter,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::endpoints::EndpointAllocator;
use crate::handler::KernelHandler;
use crate::runtime::ReplicaSupervisor;
use crate::{HandlerError, HandlerResult};

/// Reference orchestration backend running replicas in-process.
///
/// Deployment state lives in the injected [`DeploymentStore`], artifacts
/// in an [`ArtifactRepository`] on the local filesystem, and replicas are
/// supervised tokio tasks. Operations on the same tenant serialize
/// through a per-tenant async mutex; distinct tenants proceed
/// concurrently.
pub struct LocalKernelHandler {
    store: Arc<dyn DeploymentStore>,
    repository: ArtifactRepository,
    supervisor: ReplicaSupervisor,
    allocator: EndpointAllocator,
    max_replicas: u32,
    event_log: Option<Mutex<EventLogWriter>>,
    tenant_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LocalKernelHandler {
    /// Build a handler from configuration and a deployment store.
    ///
    /// Resumes endpoint allocation past any endpoints recorded in the
    /// store so restarted handlers never re-issue a port still in use.
    pub async fn open(config: &AppConfig, store: Arc<dyn DeploymentStore>) -> HandlerResult<Self> {
        let repository = ArtifactRepository::open(&config.artifacts.repository_root)?;
        let allocator = EndpointAllocator::new(&config.service);
        let supervisor = ReplicaSupervisor::new(config.runtime.heartbeat_interval);

        let records = store.list().await?;
        for record in &records {
            allocator.resume_past(record.endpoints.iter().map(String::as_str));
            // Replica tasks do not outlive the process; active deployments
            // resume supervision here or later operations would retarget
            // an empty replica set.
            if record.state == DeploymentState::Active {
                supervisor.start_tenant(&record.tenant, &record.build_version, record.replicas);
            }
        }

        Ok(Self {
            store,
            repository,
            supervisor,
            allocator,
            max_replicas: config.runtime.max_replicas,
            event_log: None,
            tenant_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a lifecycle event log; every mutation appends an entry.
    pub fn with_event_log(mut self, path: &Path) -> HandlerResult<Self> {
        self.event_log = Some(Mutex::new(EventLogWriter::open(path)?));
        Ok(self)
    }

    /// The artifact repository backing this handler.
    #[must_use]
    pub fn repository(&self) -> &ArtifactRepository {
        &self.repository
    }

    /// Number of replica tasks currently supervised for the tenant.
    #[must_use]
    pub fn running_replicas(&self, tenant: &TenantId) -> u32 {
        self.supervisor.running_count(tenant)
    }

    /// Stop every replica across all tenants. Deployment records are kept.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown_all().await;
    }

    async fn lock_tenant(&self, tenant: &TenantId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.tenant_locks.lock();
            locks
                .entry(tenant.as_str().to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn check_tenant(&self, tenant: &TenantId) -> HandlerResult<()> {
        if !tenant.is_valid() {
            return Err(HandlerError::InvalidRequest(
                "tenant identifier cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }

    async fn require_record(&self, tenant: &TenantId) -> HandlerResult<DeploymentRecord> {
        self.store
            .get(tenant)
            .await?
            .ok_or_else(|| HandlerError::TenantNotDeployed(tenant.to_string()))
    }

    #[cfg(test)]
    fn has_tenant_lock(&self, tenant: &TenantId) -> bool {
        self.tenant_locks.lock().contains_key(tenant.as_str())
    }

    fn record_event(&self, tenant: &TenantId, event: &str, payload: serde_json::Value) {
        if let Some(log) = &self.event_log {
            let entry = EventLogEntry::new(tenant.clone(), event, payload);
            if let Err(err) = log.lock().append(entry) {
                warn!(tenant = %tenant, event, error = %err, "event log append failed");
            }
        }
    }
}

#[async_trait]
impl KernelHandler for LocalKernelHandler {
    async fn deploy(
        &self,
        tenant: &TenantId,
        kernel_path: &Path,
        build_version: &BuildVersion,
        replicas: u32,
    ) -> HandlerResult<bool> {
        self.check_tenant(tenant)?;
        if replicas > self.max_replicas {
            return Err(HandlerError::InvalidRequest(format!(
                "replica count {replicas} exceeds configured maximum {}",
                self.max_replicas
            )));
        }
        let _guard = self.lock_tenant(tenant).await;

        if self.store.get(tenant).await?.is_some() {
            warn!(tenant = %tenant, "deploy ignored, tenant already has an active deployment");
            return Ok(false);
        }

        let artifact = self.repository.import(tenant, build_version, kernel_path)?;
        let endpoints = self.allocator.allocate(replicas)?;

        let mut record = DeploymentRecord::new(
            tenant.clone(),
            build_version.clone(),
            artifact.path,
            artifact.digest,
            replicas,
            endpoints,
        );
        record.state = DeploymentState::Active;
        // Persist before starting tasks: a failed insert must not leave
        // unrecorded replicas running.
        self.store.insert(&record).await?;
        self.supervisor.start_tenant(tenant, build_version, replicas);

        self.record_event(
            tenant,
            "deployed",
            json!({ "version": build_version.as_str(), "replicas": replicas }),
        );
        info!(tenant = %tenant, version = %build_version, replicas, "kernel deployed");
        Ok(true)
    }

    async fn roll_update(
        &self,
        tenant: &TenantId,
        kernel_path: &Path,
        build_version: &BuildVersion,
    ) -> HandlerResult<bool> {
        self.check_tenant(tenant)?;
        let _guard = self.lock_tenant(tenant).await;

        let mut record = self.require_record(tenant).await?;
        if record.build_version == *build_version {
            return Ok(false);
        }
        if build_version.precedes(&record.build_version) {
            warn!(
                tenant = %tenant,
                running = %record.build_version,
                requested = %build_version,
                "rolling update targets a lower build version"
            );
        }

        let artifact = self.repository.import(tenant, build_version, kernel_path)?;
        self.supervisor.retarget(tenant, build_version).await;

        let previous = std::mem::replace(&mut record.build_version, build_version.clone());
        record.history.push(previous.clone());
        record.kernel_path = artifact.path;
        record.artifact_digest = artifact.digest;
        record.touch();
        self.store.update(&record).await?;

        self.record_event(
            tenant,
            "rolled_update",
            json!({ "from": previous.as_str(), "to": build_version.as_str() }),
        );
        info!(tenant = %tenant, from = %previous, to = %build_version, "rolling update complete");
        Ok(true)
    }

    async fn roll_back(
        &self,
        tenant: &TenantId,
        running_version: &BuildVersion,
        target_version: &BuildVersion,
    ) -> HandlerResult<bool> {
        self.check_tenant(tenant)?;
        let _guard = self.lock_tenant(tenant).await;

        let mut record = self.require_record(tenant).await?;
        if record.build_version != *running_version {
            return Err(HandlerError::VersionMismatch {
                tenant: tenant.to_string(),
                running: record.build_version.to_string(),
                reported: running_version.to_string(),
            });
        }
        if !target_version.precedes(running_version) {
            return Err(HandlerError::NotLowerVersion {
                tenant: tenant.to_string(),
                running: running_version.to_string(),
                target: target_version.to_string(),
            });
        }

        let artifact = self.repository.resolve(tenant, target_version)?;
        self.supervisor.retarget(tenant, target_version).await;

        record.history.push(record.build_version.clone());
        record.build_version = target_version.clone();
        record.kernel_path = artifact.path;
        record.artifact_digest = artifact.digest;
        record.touch();
        self.store.update(&record).await?;

        self.record_event(
            tenant,
            "rolled_back",
            json!({ "from": running_version.as_str(), "to": target_version.as_str() }),
        );
        info!(tenant = %tenant, from = %running_version, to = %target_version, "rollback complete");
        Ok(true)
    }

    async fn scale(&self, tenant: &TenantId, replicas: u32) -> HandlerResult<bool> {
        self.check_tenant(tenant)?;
        if replicas > self.max_replicas {
            return Err(HandlerError::InvalidRequest(format!(
                "replica count {replicas} exceeds configured maximum {}",
                self.max_replicas
            )));
        }
        let _guard = self.lock_tenant(tenant).await;

        let mut record = self.require_record(tenant).await?;
        if record.replicas == replicas {
            return Ok(false);
        }

        if replicas > record.replicas {
            let grown = self.allocator.allocate(replicas - record.replicas)?;
            record.endpoints.extend(grown);
        } else {
            record.endpoints.truncate(replicas as usize);
        }
        let previous = std::mem::replace(&mut record.replicas, replicas);
        record.touch();
        self.store.update(&record).await?;

        self.supervisor
            .set_count(tenant, &record.build_version, replicas)
            .await;

        self.record_event(
            tenant,
            "scaled",
            json!({ "from": previous, "to": replicas }),
        );
        info!(tenant = %tenant, from = previous, to = replicas, "replica count changed");
        Ok(true)
    }

    async fn remove(&self, tenant: &TenantId) -> HandlerResult<bool> {
        self.check_tenant(tenant)?;
        let _guard = self.lock_tenant(tenant).await;

        let record = self.require_record(tenant).await?;
        self.supervisor.stop_tenant(tenant).await;
        self.store.remove(tenant).await?;
        // The owned guard keeps the mutex alive; dropping the map entry
        // stops the lock table growing with tenant churn.
        self.tenant_locks.lock().remove(tenant.as_str());

        self.record_event(
            tenant,
            "removed",
            json!({ "version": record.build_version.as_str(), "replicas": record.replicas }),
        );
        info!(tenant = %tenant, version = %record.build_version, "deployment removed");
        Ok(true)
    }

    async fn replica_count(&self, tenant: &TenantId) -> HandlerResult<u32> {
        self.check_tenant(tenant)?;
        let _guard = self.lock_tenant(tenant).await;
        Ok(self.require_record(tenant).await?.replicas)
    }

    async fn service_access_ips(&self, tenant: &TenantId) -> HandlerResult<String> {
        self.check_tenant(tenant)?;
        let _guard = self.lock_tenant(tenant).await;
        let record = self.require_record(tenant).await?;
        Ok(format!(
            "tenant {} exposes {} service access point(s): {}",
            tenant,
            record.endpoints.len(),
            record.endpoints.join(", ")
        ))
    }

    async fn list_existing_build_artifacts(
        &self,
        tenant: &TenantId,
        build_version: &BuildVersion,
    ) -> HandlerResult<Vec<BuildVersion>> {
        self.check_tenant(tenant)?;
        let _guard = self.lock_tenant(tenant).await;
        Ok(self.repository.list_matching(tenant, build_version)?)
    }

    async fn list_lower_build_artifact_versions(
        &self,
        tenant: &TenantId,
        build_version: &BuildVersion,
    ) -> HandlerResult<Vec<BuildVersion>> {
        self.check_tenant(tenant)?;
        let _guard = self.lock_tenant(tenant).await;
        let record = self.require_record(tenant).await?;
        Ok(self
            .repository
            .list_lower(tenant, build_version, &record.build_version)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdm_store::{MemoryStore, StoreError};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Harness {
        handler: LocalKernelHandler,
        kernel: PathBuf,
        _temp: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.artifacts.repository_root = temp.path().join("artifacts");
        config.state.directory = temp.path().join("state");
        config.runtime.heartbeat_interval = Duration::from_millis(20);
        config.runtime.max_replicas = 8;

        let kernel = temp.path().join("kernel.zip");
        fs::write(&kernel, b"kernel archive bytes").expect("write kernel");

        let handler = LocalKernelHandler::open(&config, Arc::new(MemoryStore::new()))
            .await
            .expect("open handler");
        Harness {
            handler,
            kernel,
            _temp: temp,
        }
    }

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name)
    }

    fn version(v: &str) -> BuildVersion {
        BuildVersion::new(v)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deploy_then_query_replicas_and_endpoints() {
        let h = harness().await;
        let t = tenant("acme");

        assert!(matches!(
            h.handler.replica_count(&t).await,
            Err(HandlerError::TenantNotDeployed(_))
        ));

        assert!(h
            .handler
            .deploy(&t, &h.kernel, &version("4.4.1"), 3)
            .await
            .expect("deploy"));
        assert_eq!(h.handler.replica_count(&t).await.expect("count"), 3);

        let message = h.handler.service_access_ips(&t).await.expect("endpoints");
        assert!(message.contains("3 service access point(s)"));
        assert!(message.contains("https://127.0.0.1:9443"));

        h.handler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_deploy_is_an_accepted_noop() {
        let h = harness().await;
        let t = tenant("acme");

        assert!(h
            .handler
            .deploy(&t, &h.kernel, &version("4.4.1"), 2)
            .await
            .expect("deploy"));
        assert!(!h
            .handler
            .deploy(&t, &h.kernel, &version("5.0.0"), 4)
            .await
            .expect("second deploy"));
        // The no-op left the original deployment untouched.
        assert_eq!(h.handler.replica_count(&t).await.expect("count"), 2);

        h.handler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scale_changes_replicas_and_endpoints() {
        let h = harness().await;
        let t = tenant("acme");
        h.handler
            .deploy(&t, &h.kernel, &version("4.4.1"), 2)
            .await
            .expect("deploy");

        assert!(h.handler.scale(&t, 4).await.expect("scale up"));
        assert_eq!(h.handler.replica_count(&t).await.expect("count"), 4);

        assert!(!h.handler.scale(&t, 4).await.expect("same count"));

        assert!(h.handler.scale(&t, 1).await.expect("scale down"));
        let message = h.handler.service_access_ips(&t).await.expect("endpoints");
        assert!(message.contains("1 service access point(s)"));

        assert!(matches!(
            h.handler.scale(&t, 9).await,
            Err(HandlerError::InvalidRequest(_))
        ));

        h.handler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn roll_update_and_roll_back_cycle() {
        let h = harness().await;
        let t = tenant("acme");
        h.handler
            .deploy(&t, &h.kernel, &version("4.4.1"), 2)
            .await
            .expect("deploy");

        assert!(h
            .handler
            .roll_update(&t, &h.kernel, &version("4.4.2"))
            .await
            .expect("update"));
        assert!(!h
            .handler
            .roll_update(&t, &h.kernel, &version("4.4.2"))
            .await
            .expect("same version"));

        // Rollback with a stale running version is rejected.
        assert!(matches!(
            h.handler
                .roll_back(&t, &version("4.4.1"), &version("4.4.0"))
                .await,
            Err(HandlerError::VersionMismatch { .. })
        ));
        // Rollback target must precede the running version.
        assert!(matches!(
            h.handler
                .roll_back(&t, &version("4.4.2"), &version("5.0.0"))
                .await,
            Err(HandlerError::NotLowerVersion { .. })
        ));

        assert!(h
            .handler
            .roll_back(&t, &version("4.4.2"), &version("4.4.1"))
            .await
            .expect("rollback"));
        assert_eq!(h.handler.replica_count(&t).await.expect("count"), 2);

        let lower = h
            .handler
            .list_lower_build_artifact_versions(&t, &version("4.4"))
            .await
            .expect("lower");
        assert!(lower.is_empty(), "nothing precedes the rolled-back build");

        h.handler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn artifact_listings_follow_release_order() {
        let h = harness().await;
        let t = tenant("acme");
        h.handler
            .deploy(&t, &h.kernel, &version("4.4.1"), 1)
            .await
            .expect("deploy");
        h.handler
            .roll_update(&t, &h.kernel, &version("4.4.2"))
            .await
            .expect("update");
        h.handler
            .roll_update(&t, &h.kernel, &version("4.4.10"))
            .await
            .expect("update");

        let existing = h
            .handler
            .list_existing_build_artifacts(&t, &version("4.4"))
            .await
            .expect("existing");
        let names: Vec<&str> = existing.iter().map(BuildVersion::as_str).collect();
        assert_eq!(names, ["4.4.1", "4.4.2", "4.4.10"]);

        let lower = h
            .handler
            .list_lower_build_artifact_versions(&t, &version("4.4"))
            .await
            .expect("lower");
        let names: Vec<&str> = lower.iter().map(BuildVersion::as_str).collect();
        assert_eq!(names, ["4.4.1", "4.4.2"]);

        h.handler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remove_tears_down_the_deployment() {
        let h = harness().await;
        let t = tenant("acme");
        h.handler
            .deploy(&t, &h.kernel, &version("4.4.1"), 2)
            .await
            .expect("deploy");

        assert!(h.handler.remove(&t).await.expect("remove"));
        assert!(
            !h.handler.has_tenant_lock(&t),
            "lock table entry is dropped with the deployment"
        );
        assert!(matches!(
            h.handler.replica_count(&t).await,
            Err(HandlerError::TenantNotDeployed(_))
        ));
        assert!(matches!(
            h.handler.remove(&t).await,
            Err(HandlerError::TenantNotDeployed(_))
        ));

        h.handler.shutdown().await;
    }

    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        fn write_error() -> StoreError {
            StoreError::Io(std::io::Error::other("state flush failed"))
        }
    }

    #[async_trait]
    impl DeploymentStore for FlakyStore {
        async fn insert(&self, record: &DeploymentRecord) -> kdm_store::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::write_error());
            }
            self.inner.insert(record).await
        }

        async fn get(&self, tenant: &TenantId) -> kdm_store::Result<Option<DeploymentRecord>> {
            self.inner.get(tenant).await
        }

        async fn update(&self, record: &DeploymentRecord) -> kdm_store::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::write_error());
            }
            self.inner.update(record).await
        }

        async fn remove(&self, tenant: &TenantId) -> kdm_store::Result<DeploymentRecord> {
            self.inner.remove(tenant).await
        }

        async fn list(&self) -> kdm_store::Result<Vec<DeploymentRecord>> {
            self.inner.list().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_state_writes_leave_no_replicas_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.artifacts.repository_root = temp.path().join("artifacts");
        config.runtime.heartbeat_interval = Duration::from_millis(20);

        let kernel = temp.path().join("kernel.zip");
        fs::write(&kernel, b"kernel archive bytes").expect("write kernel");

        let store = Arc::new(FlakyStore::new());
        let handler = LocalKernelHandler::open(&config, store.clone())
            .await
            .expect("open handler");
        let t = tenant("acme");

        store.set_fail_writes(true);
        assert!(handler.deploy(&t, &kernel, &version("4.4.1"), 2).await.is_err());
        assert_eq!(
            handler.running_replicas(&t),
            0,
            "a failed deploy must not leave unrecorded replica tasks"
        );

        store.set_fail_writes(false);
        handler
            .deploy(&t, &kernel, &version("4.4.1"), 2)
            .await
            .expect("deploy");

        store.set_fail_writes(true);
        assert!(handler.scale(&t, 4).await.is_err());
        assert_eq!(
            handler.running_replicas(&t),
            2,
            "a failed scale leaves the replica set unchanged"
        );

        handler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn endpoints_are_not_recycled_across_deployments() {
        let h = harness().await;
        let first = tenant("acme");
        h.handler
            .deploy(&first, &h.kernel, &version("1.0.0"), 2)
            .await
            .expect("deploy");
        h.handler.remove(&first).await.expect("remove");

        let second = tenant("globex");
        h.handler
            .deploy(&second, &h.kernel, &version("1.0.0"), 1)
            .await
            .expect("deploy");
        let message = h
            .handler
            .service_access_ips(&second)
            .await
            .expect("endpoints");
        assert!(message.contains("https://127.0.0.1:9445"));

        h.handler.shutdown().await;
    }
}
