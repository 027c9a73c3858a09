//! ---
//! kdm_section: "03-persistence-logging"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "JSON file-backed deployment store."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use kdm_common::TenantId;
use parking_lot::RwLock;
use tracing::debug;

use crate::{DeploymentRecord, DeploymentStore, Result, StoreError};

const STATE_FILE: &str = "deployments.json";

/// File-backed deployment store.
///
/// Records are cached in memory and flushed as a single pretty-printed
/// JSON document after every mutation. The flush writes to a temporary
/// file and renames it over the state file so a crash never leaves a
/// half-written document behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: RwLock<IndexMap<String, DeploymentRecord>>,
}

impl FileStore {
    /// Open (or create) a store under the given state directory.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let path = directory.join(STATE_FILE);

        let records = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            IndexMap::new()
        };
        debug!(path = %path.display(), records = records.len(), "deployment state loaded");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Path of the backing state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, records: &IndexMap<String, DeploymentRecord>) -> Result<()> {
        let serialized = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn insert(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self.records.write();
        let key = record.tenant.as_str().to_owned();
        if records.contains_key(&key) {
            return Err(StoreError::TenantExists(key));
        }
        records.insert(key, record.clone());
        self.flush(&records)
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
        self.flush(&records)
    }

    async fn remove(&self, tenant: &TenantId) -> Result<DeploymentRecord> {
        let mut records = self.records.write();
        let removed = records
            .shift_remove(tenant.as_str())
            .ok_or_else(|| StoreError::TenantMissing(tenant.to_string()))?;
        self.flush(&records)?;
        Ok(removed)
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
    async fn state_survives_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");

        {
            let store = FileStore::open(temp.path()).expect("open");
            store.insert(&test_record("acme")).await.expect("insert");
            store.insert(&test_record("globex")).await.expect("insert");
        }

        let reopened = FileStore::open(temp.path()).expect("reopen");
        let records = reopened.list().await.expect("list");
        assert_eq!(records.len(), 2);
        assert!(reopened
            .get(&TenantId::new("acme"))
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn remove_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open");
        store.insert(&test_record("acme")).await.expect("insert");
        store.remove(&TenantId::new("acme")).await.expect("remove");

        let reopened = FileStore::open(temp.path()).expect("reopen");
        assert!(reopened
            .get(&TenantId::new("acme"))
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn no_stray_temp_file_after_flush() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open");
        store.insert(&test_record("acme")).await.expect("insert");
        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
    }
}
