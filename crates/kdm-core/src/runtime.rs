//! ---
//! kdm_section: "04-deployment-orchestration"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Supervised replica tasks for tenant deployments."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kdm_common::{BuildVersion, TenantId};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

/// Supervises the replica tasks backing tenant deployments.
///
/// Each replica is a tokio task emitting heartbeat ticks at the
/// configured interval. Replicas are stopped individually through a
/// watch-channel kill switch; the whole supervisor shuts down through a
/// broadcast channel.
#[derive(Debug)]
pub struct ReplicaSupervisor {
    heartbeat_interval: Duration,
    shutdown: broadcast::Sender<()>,
    tenants: Mutex<HashMap<String, TenantReplicas>>,
}

#[derive(Debug, Default)]
struct TenantReplicas {
    next_index: u64,
    handles: Vec<ReplicaHandle>,
}

impl ReplicaSupervisor {
    /// Create a supervisor whose replicas tick at `heartbeat_interval`.
    #[must_use]
    pub fn new(heartbeat_interval: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(4);
        Self {
            heartbeat_interval,
            shutdown,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Start `count` replicas for a tenant on the given build.
    pub fn start_tenant(&self, tenant: &TenantId, build: &BuildVersion, count: u32) {
        let mut tenants = self.tenants.lock();
        let entry = tenants.entry(tenant.as_str().to_owned()).or_default();
        for _ in 0..count {
            let handle = self.spawn_replica(tenant, build, entry.next_index);
            entry.next_index += 1;
            entry.handles.push(handle);
        }
    }

    /// Grow or shrink the tenant's replica set to `count`.
    pub async fn set_count(&self, tenant: &TenantId, build: &BuildVersion, count: u32) {
        let excess = {
            let mut tenants = self.tenants.lock();
            let entry = tenants.entry(tenant.as_str().to_owned()).or_default();
            let current = entry.handles.len() as u32;
            if count > current {
                for _ in 0..count - current {
                    let handle = self.spawn_replica(tenant, build, entry.next_index);
                    entry.next_index += 1;
                    entry.handles.push(handle);
                }
                Vec::new()
            } else {
                entry.handles.split_off(count as usize)
            }
        };
        for handle in excess {
            handle.kill();
            handle.join().await;
        }
    }

    /// Restart the tenant's replicas one at a time on a new build.
    ///
    /// At no point do replicas of two different builds outnumber the
    /// configured count; each old replica is fully stopped before its
    /// replacement starts.
    pub async fn retarget(&self, tenant: &TenantId, build: &BuildVersion) {
        let count = self.running_count(tenant);
        for _ in 0..count {
            let oldest = {
                let mut tenants = self.tenants.lock();
                tenants
                    .get_mut(tenant.as_str())
                    .and_then(|entry| (!entry.handles.is_empty()).then(|| entry.handles.remove(0)))
            };
            let Some(handle) = oldest else {
                break;
            };
            handle.kill();
            handle.join().await;

            let mut tenants = self.tenants.lock();
            let entry = tenants.entry(tenant.as_str().to_owned()).or_default();
            let replacement = self.spawn_replica(tenant, build, entry.next_index);
            entry.next_index += 1;
            entry.handles.push(replacement);
        }
    }

    /// Stop every replica of the tenant and forget it.
    pub async fn stop_tenant(&self, tenant: &TenantId) {
        let entry = self.tenants.lock().remove(tenant.as_str());
        let Some(entry) = entry else {
            return;
        };
        for handle in &entry.handles {
            handle.kill();
        }
        for handle in entry.handles {
            handle.join().await;
        }
        debug!(tenant = %tenant, "all replicas stopped");
    }

    /// Number of replica tasks currently running for the tenant.
    #[must_use]
    pub fn running_count(&self, tenant: &TenantId) -> u32 {
        self.tenants
            .lock()
            .get(tenant.as_str())
            .map_or(0, |entry| entry.handles.len() as u32)
    }

    /// Stop every replica of every tenant.
    pub async fn shutdown_all(&self) {
        let _ = self.shutdown.send(());
        let entries: Vec<TenantReplicas> = {
            let mut tenants = self.tenants.lock();
            tenants.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            for handle in entry.handles {
                handle.join().await;
            }
        }
    }

    fn spawn_replica(&self, tenant: &TenantId, build: &BuildVersion, index: u64) -> ReplicaHandle {
        let replica_id = format!("{}-r{index}", tenant.as_str());
        spawn_replica_task(
            tenant.as_str().to_owned(),
            build.as_str().to_owned(),
            replica_id,
            self.heartbeat_interval,
            self.shutdown.subscribe(),
        )
    }
}

fn spawn_replica_task(
    tenant: String,
    build: String,
    replica_id: String,
    heartbeat_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> ReplicaHandle {
    let (kill_tx, mut kill_rx) = watch::channel(false);
    let id = replica_id.clone();
    let task = tokio::spawn(async move {
        let mut tick: u64 = 0;
        let mut ticker = interval(heartbeat_interval);
        debug!(tenant = %tenant, replica = %replica_id, build = %build, "replica started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(tenant = %tenant, replica = %replica_id, "replica shutdown received");
                    break;
                }
                changed = kill_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            if *kill_rx.borrow() {
                                debug!(tenant = %tenant, replica = %replica_id, "replica kill switch triggered");
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                _ = ticker.tick() => {
                    tick += 1;
                    debug!(tenant = %tenant, replica = %replica_id, build = %build, tick, "replica heartbeat");
                }
            }
        }
        debug!(tenant = %tenant, replica = %replica_id, tick, "replica loop exited");
    });

    ReplicaHandle::new(id, kill_tx, task)
}

/// Handle to a single running replica task.
#[derive(Clone, Debug)]
struct ReplicaHandle {
    replica_id: String,
    kill_tx: watch::Sender<bool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ReplicaHandle {
    fn new(replica_id: String, kill_tx: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self {
            replica_id,
            kill_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    fn kill(&self) {
        let _ = self.kill_tx.send(true);
    }

    async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(task) = handle {
            if let Err(err) = task.await {
                warn!(replica = %self.replica_id, error = %err, "replica join error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_supervisor() -> ReplicaSupervisor {
        ReplicaSupervisor::new(Duration::from_millis(20))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_and_stop_tenant() {
        let supervisor = fast_supervisor();
        let tenant = TenantId::new("acme");
        supervisor.start_tenant(&tenant, &BuildVersion::new("4.4.1"), 3);
        assert_eq!(supervisor.running_count(&tenant), 3);

        supervisor.stop_tenant(&tenant).await;
        assert_eq!(supervisor.running_count(&tenant), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn set_count_grows_and_shrinks() {
        let supervisor = fast_supervisor();
        let tenant = TenantId::new("acme");
        let build = BuildVersion::new("4.4.1");
        supervisor.start_tenant(&tenant, &build, 2);

        supervisor.set_count(&tenant, &build, 5).await;
        assert_eq!(supervisor.running_count(&tenant), 5);

        supervisor.set_count(&tenant, &build, 1).await;
        assert_eq!(supervisor.running_count(&tenant), 1);
        supervisor.shutdown_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retarget_preserves_replica_count() {
        let supervisor = fast_supervisor();
        let tenant = TenantId::new("acme");
        supervisor.start_tenant(&tenant, &BuildVersion::new("4.4.1"), 3);

        supervisor.retarget(&tenant, &BuildVersion::new("4.4.2")).await;
        assert_eq!(supervisor.running_count(&tenant), 3);
        supervisor.shutdown_all().await;
    }
}
