use crate::domain::ports::{RecordKind, RecordStore, RecordWrite, StoredRecord};
use crate::domain::tenant::TenantId;
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Separates the tenant prefix from the record id in keys.
const KEY_SEPARATOR: u8 = 0x1f;

/// A persistent store using RocksDB.
///
/// Each `RecordKind` lives in its own Column Family; keys are prefixed with
/// the tenant id so every tenant gets a disjoint key range. Values are the
/// record version (8 bytes, big endian) followed by the JSON payload.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_locks: Arc<Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// one column family per record kind.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = RecordKind::ALL
            .iter()
            .map(|kind| ColumnFamilyDescriptor::new(kind.as_str(), Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns the record store for one tenant.
    pub fn scoped(&self, tenant: &TenantId) -> Result<RocksDBTenantStore> {
        let lock = {
            let mut locks = self
                .commit_locks
                .lock()
                .map_err(|_| CommerceError::internal("RocksDB commit lock poisoned"))?;
            locks.entry(tenant.clone()).or_default().clone()
        };
        let mut prefix = tenant.as_str().as_bytes().to_vec();
        prefix.push(KEY_SEPARATOR);
        Ok(RocksDBTenantStore {
            db: self.db.clone(),
            prefix,
            commit_lock: lock,
        })
    }
}

/// A tenant's slice of a `RocksDBStore`.
#[derive(Clone)]
pub struct RocksDBTenantStore {
    db: Arc<DB>,
    prefix: Vec<u8>,
    commit_lock: Arc<tokio::sync::Mutex<()>>,
}

impl RocksDBTenantStore {
    fn cf(&self, kind: RecordKind) -> Result<&ColumnFamily> {
        self.db.cf_handle(kind.as_str()).ok_or_else(|| {
            CommerceError::internal(format!("{} column family not found", kind.as_str()))
        })
    }

    fn key(&self, id: &str) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn decode(id: String, bytes: &[u8]) -> Result<StoredRecord> {
        let (version, data) = bytes
            .split_first_chunk::<8>()
            .ok_or_else(|| CommerceError::internal(format!("Corrupt record {id}")))?;
        Ok(StoredRecord {
            id,
            version: u64::from_be_bytes(*version),
            data: data.to_vec(),
        })
    }

    fn encode(version: u64, data: &[u8]) -> Vec<u8> {
        let mut value = version.to_be_bytes().to_vec();
        value.extend_from_slice(data);
        value
    }

    fn current_version(&self, kind: RecordKind, id: &str) -> Result<Option<u64>> {
        let cf = self.cf(kind)?;
        let value = self.db.get_pinned_cf(cf, self.key(id))?;
        value
            .map(|bytes| Self::decode(id.to_string(), &bytes).map(|r| r.version))
            .transpose()
    }
}

#[async_trait]
impl RecordStore for RocksDBTenantStore {
    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>> {
        let cf = self.cf(kind)?;
        match self.db.get_cf(cf, self.key(id))? {
            Some(bytes) => Ok(Some(Self::decode(id.to_string(), &bytes)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, kind: RecordKind) -> Result<Vec<StoredRecord>> {
        let cf = self.cf(kind)?;
        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(self.prefix.as_slice(), Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            let Some(id) = key.strip_prefix(self.prefix.as_slice()) else {
                break;
            };
            let id = String::from_utf8(id.to_vec())
                .map_err(|e| CommerceError::InternalError(Box::new(e)))?;
            records.push(Self::decode(id, &value)?);
        }

        Ok(records)
    }

    async fn commit(&self, writes: Vec<RecordWrite>) -> Result<()> {
        // Held per tenant only across the version check and the batch write.
        // Conflicts are still decided per record version.
        let _guard = self.commit_lock.lock().await;

        for write in &writes {
            if self.current_version(write.kind, &write.id)? != write.expected_version {
                return Err(CommerceError::StoreConflict(format!(
                    "{}/{}",
                    write.kind.as_str(),
                    write.id
                )));
            }
        }

        let mut batch = WriteBatch::default();
        for write in &writes {
            let version = write.expected_version.map_or(1, |v| v + 1);
            batch.put_cf(
                self.cf(write.kind)?,
                self.key(&write.id),
                Self::encode(version, &write.data),
            );
        }
        self.db.write(batch)?;

        Ok(())
    }
}
