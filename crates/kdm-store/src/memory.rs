//! ---
//! kdm_section: "03-persistence-logging"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "In-memory deployment store for tests."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use async_trait::async_trait;
use indexmap::IndexMap;
use kdm_common::TenantId;
use parking_lot::RwLock;

use crate::{DeploymentRecord, DeploymentStore, Result, StoreError};

/// In-memory deployment store.
///
/// Not suitable for production use: all state is lost when the process
/// exits. Primarily backs tests and ephemeral handlers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<IndexMap<String, DeploymentRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self.records.write();
        let key = record.tenant.as_str().to_owned();
        if records.contains_key(&key) {
            return Err(StoreError::TenantExists(key));
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, tenant: &TenantId) -> Result<Option<DeploymentRecord>> {
        Ok(self.records.read().get(tenant.as_str()).cloned())
    }

    async fn update(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self.records.write();
        let existing = records
            .get_mut(record.tenant.as_str())
            .ok_or_else(|| StoreError::TenantMissing(record.tenant.to_string()))?;
        *existing = record.clone();
        Ok(())
    }

    async fn remove(&self, tenant: &TenantId) -> Result<DeploymentRecord> {
        self.records
            .write()
            .shift_remove(tenant.as_str())
            .ok_or_else(|| StoreError::TenantMissing(tenant.to_string()))
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        let mut records: Vec<DeploymentRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdm_common::BuildVersion;
    use std::path::PathBuf;

    fn test_record(tenant: &str) -> DeploymentRecord {
        DeploymentRecord::new(
            TenantId::new(tenant),
            BuildVersion::new("4.4.1"),
            PathBuf::from("/tmp/repo/acme/4.4.1/kernel.zip"),
            "digest".to_owned(),
            2,
            vec!["https://127.0.0.1:9443".to_owned()],
        )
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        let record = test_record("acme");
        store.insert(&record).await.expect("insert");

        let fetched = store
            .get(&TenantId::new("acme"))
            .await
            .expect("get")
            .expect("record present");
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.replicas, 2);
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = MemoryStore::new();
        let record = test_record("acme");
        store.insert(&record).await.expect("first insert");
        assert!(matches!(
            store.insert(&record).await,
            Err(StoreError::TenantExists(_))
        ));
    }

    #[tokio::test]
    async fn update_requires_existing_tenant() {
        let store = MemoryStore::new();
        let mut record = test_record("acme");
        assert!(matches!(
            store.update(&record).await,
            Err(StoreError::TenantMissing(_))
        ));

        store.insert(&record).await.expect("insert");
        record.replicas = 5;
        store.update(&record).await.expect("update");

        let fetched = store
            .get(&record.tenant)
            .await
            .expect("get")
            .expect("record present");
        assert_eq!(fetched.replicas, 5);
    }

    #[tokio::test]
    async fn remove_returns_record() {
        let store = MemoryStore::new();
        let record = test_record("acme");
        store.insert(&record).await.expect("insert");

        let removed = store.remove(&record.tenant).await.expect("remove");
        assert_eq!(removed.id, record.id);
        assert!(store
            .get(&record.tenant)
            .await
            .expect("get")
            .is_none());
        assert!(store.remove(&record.tenant).await.is_err());
    }
}
