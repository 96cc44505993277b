use crate::domain::ports::{Record, RecordKind, RecordStoreRef, RecordWrite, StoredRecord};
use crate::domain::tenant::TenantId;
use crate::error::{CommerceError, Result};
use std::ops::{Deref, DerefMut};

/// A record together with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Deref for Versioned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Versioned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

fn label(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Order => "Order",
        RecordKind::Payment => "Payment",
        RecordKind::Coupon => "Coupon",
        RecordKind::Product => "Product",
        RecordKind::User => "User",
        RecordKind::DownloadGrant => "Download",
    }
}

fn decode<T: Record>(record: StoredRecord) -> Result<Versioned<T>> {
    Ok(Versioned {
        version: record.version,
        value: serde_json::from_slice(&record.data)?,
    })
}

/// Writes collected for a single atomic commit.
///
/// Nothing reaches the store until `TenantHandle::commit`, so dropping a
/// unit of work (or the future building it) leaves no partial state.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    writes: Vec<RecordWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new record. The commit fails if it already exists.
    pub fn insert<T: Record>(&mut self, value: &T) -> Result<()> {
        self.push(T::KIND, value.record_id(), None, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Writes back a record read earlier, guarded by its version.
    pub fn update<T: Record>(&mut self, record: &Versioned<T>) -> Result<()> {
        self.push(
            T::KIND,
            record.value.record_id(),
            Some(record.version),
            serde_json::to_vec(&record.value)?,
        );
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn push(&mut self, kind: RecordKind, id: String, expected_version: Option<u64>, data: Vec<u8>) {
        if let Some(existing) = self
            .writes
            .iter_mut()
            .find(|w| w.kind == kind && w.id == id)
        {
            existing.data = data;
            return;
        }
        self.writes.push(RecordWrite {
            kind,
            id,
            expected_version,
            data,
        });
    }
}

/// Request-scoped access to exactly one tenant's records.
///
/// Every read and write of the core goes through a handle, so tenant
/// isolation follows from which store the handle wraps rather than from
/// query filters.
#[derive(Clone)]
pub struct TenantHandle {
    tenant: TenantId,
    store: RecordStoreRef,
}

impl TenantHandle {
    pub(crate) fn new(tenant: TenantId, store: RecordStoreRef) -> Self {
        Self { tenant, store }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub async fn get<T: Record>(&self, id: &str) -> Result<Option<Versioned<T>>> {
        self.store
            .get(T::KIND, id)
            .await?
            .map(decode::<T>)
            .transpose()
    }

    /// Like `get`, but a missing record is a `NotFound` error.
    pub async fn require<T: Record>(&self, id: &str) -> Result<Versioned<T>> {
        self.get::<T>(id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("{} {id}", label(T::KIND))))
    }

    pub async fn list<T: Record>(&self) -> Result<Vec<Versioned<T>>> {
        self.store
            .list(T::KIND)
            .await?
            .into_iter()
            .map(decode::<T>)
            .collect()
    }

    pub async fn commit(&self, work: UnitOfWork) -> Result<()> {
        if work.is_empty() {
            return Ok(());
        }
        self.store.commit(work.writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::Product;
    use crate::domain::money::Money;
    use crate::infrastructure::in_memory::InMemoryRecordStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn product(sku: &str) -> Product {
        Product {
            sku: sku.into(),
            name: sku.to_uppercase(),
            price: Money::new(dec!(5)).unwrap(),
            downloads: vec![],
        }
    }

    #[tokio::test]
    async fn test_handle_typed_round_trip() {
        let handle = TenantHandle::new(TenantId::new("acme"), Arc::new(InMemoryRecordStore::new()));
        let mut work = UnitOfWork::new();
        work.insert(&product("mug")).unwrap();
        handle.commit(work).await.unwrap();

        let mut stored = handle.require::<Product>("mug").await.unwrap();
        assert_eq!(stored.version, 1);
        stored.price = Money::new(dec!(6)).unwrap();

        let mut work = UnitOfWork::new();
        work.update(&stored).unwrap();
        handle.commit(work).await.unwrap();
        assert_eq!(
            handle.require::<Product>("mug").await.unwrap().price,
            Money::new(dec!(6)).unwrap()
        );

        assert!(matches!(
            handle.require::<Product>("hat").await,
            Err(CommerceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let handle = TenantHandle::new(TenantId::new("acme"), Arc::new(InMemoryRecordStore::new()));
        let mut work = UnitOfWork::new();
        work.insert(&product("mug")).unwrap();
        handle.commit(work).await.unwrap();

        let first = handle.require::<Product>("mug").await.unwrap();
        let second = handle.require::<Product>("mug").await.unwrap();

        let mut work = UnitOfWork::new();
        work.update(&first).unwrap();
        handle.commit(work).await.unwrap();

        let mut work = UnitOfWork::new();
        work.update(&second).unwrap();
        assert!(matches!(
            handle.commit(work).await,
            Err(CommerceError::StoreConflict(_))
        ));
    }
}
