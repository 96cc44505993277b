use crate::domain::ports::{
    ProvisionedTenant, RecordKind, RecordStore, RecordStoreRef, RecordWrite, StoredRecord,
    TenantDirectory,
};
use crate::domain::tenant::{TenantConfig, TenantId};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

type Key = (RecordKind, String);

/// A thread-safe in-memory record store for a single tenant.
///
/// Uses `Arc<RwLock<HashMap<..>>>` so clones share the same records. Every
/// record carries a version; `commit` checks all expected versions and
/// applies all writes under one write guard, so a unit of work is atomic.
#[derive(Default, Clone)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<Key, (u64, Vec<u8>)>>>,
}

impl InMemoryRecordStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(kind, id.to_string()))
            .map(|(version, data)| StoredRecord {
                id: id.to_string(),
                version: *version,
                data: data.clone(),
            }))
    }

    async fn list(&self, kind: RecordKind) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<StoredRecord> = records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, id), (version, data))| StoredRecord {
                id: id.clone(),
                version: *version,
                data: data.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn commit(&self, writes: Vec<RecordWrite>) -> Result<()> {
        let mut records = self.records.write().await;

        for write in &writes {
            let current = records
                .get(&(write.kind, write.id.clone()))
                .map(|(version, _)| *version);
            if current != write.expected_version {
                return Err(CommerceError::StoreConflict(format!(
                    "{}/{}",
                    write.kind.as_str(),
                    write.id
                )));
            }
        }

        for write in writes {
            let version = write.expected_version.map_or(1, |v| v + 1);
            records.insert((write.kind, write.id), (version, write.data));
        }
        Ok(())
    }
}

/// Tenant directory that keeps one isolated `InMemoryRecordStore` per tenant.
///
/// Tenants can be marked offline to simulate an unreachable backing store.
#[derive(Default, Clone)]
pub struct InMemoryTenantDirectory {
    tenants: Arc<RwLock<HashMap<TenantId, ProvisionedTenant>>>,
    offline: Arc<RwLock<HashSet<TenantId>>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant with a fresh store, or replaces its configuration
    /// while keeping the existing store.
    pub async fn provision(&self, tenant: TenantId, config: TenantConfig) -> ProvisionedTenant {
        let mut tenants = self.tenants.write().await;
        let store = match tenants.get(&tenant) {
            Some(existing) => existing.store.clone(),
            None => Arc::new(InMemoryRecordStore::new()),
        };
        let provisioned = ProvisionedTenant { config, store };
        tenants.insert(tenant, provisioned.clone());
        provisioned
    }

    /// Registers a tenant backed by an externally opened store.
    pub async fn provision_with_store(
        &self,
        tenant: TenantId,
        config: TenantConfig,
        store: RecordStoreRef,
    ) -> ProvisionedTenant {
        let provisioned = ProvisionedTenant { config, store };
        self.tenants
            .write()
            .await
            .insert(tenant, provisioned.clone());
        provisioned
    }

    pub async fn deprovision(&self, tenant: &TenantId) {
        self.tenants.write().await.remove(tenant);
    }

    pub async fn set_offline(&self, tenant: &TenantId, offline: bool) {
        let mut set = self.offline.write().await;
        if offline {
            set.insert(tenant.clone());
        } else {
            set.remove(tenant);
        }
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn lookup(&self, tenant: &TenantId) -> Result<Option<ProvisionedTenant>> {
        if self.offline.read().await.contains(tenant) {
            return Err(CommerceError::TenantUnavailable(tenant.to_string()));
        }
        Ok(self.tenants.read().await.get(tenant).cloned())
    }
}
