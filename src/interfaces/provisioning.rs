use crate::application::Commerce;
use crate::application::handle::{TenantHandle, UnitOfWork};
use crate::domain::coupon::Coupon;
use crate::domain::identity::{Identity, Role, User, UserId};
use crate::domain::ports::{Record, RecordStoreRef};
use crate::domain::product::Product;
use crate::domain::tenant::{TenantConfig, TenantId};
use crate::error::Result;
use crate::infrastructure::credentials::StaticCredentials;
use crate::infrastructure::in_memory::InMemoryTenantDirectory;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// A bearer token and the identity it stands for.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialSeed {
    pub token: String,
    #[serde(default)]
    pub user: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialSeed {
    fn identity(&self) -> Identity {
        Identity {
            user_id: self.user.clone().map(UserId::new),
            role: self.role,
        }
    }
}

/// Configuration and seed data of one tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantSeed {
    pub config: TenantConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialSeed>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    #[serde(default)]
    pub users: Vec<User>,
}

/// The tenants file: tenant id to seed.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantsFile {
    pub tenants: BTreeMap<String, TenantSeed>,
}

impl TenantsFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Registers every tenant of `file` in `directory` and seeds its store.
///
/// Seed records are inserted only when absent, so state kept in a
/// persistent store (coupon usage, for one) survives later runs.
/// Returns the credential table for the provisioned tenants.
pub async fn provision<F>(
    file: &TenantsFile,
    directory: &InMemoryTenantDirectory,
    mut store_for: F,
) -> Result<StaticCredentials>
where
    F: FnMut(&TenantId) -> Result<RecordStoreRef>,
{
    let mut credentials = StaticCredentials::new();
    for (id, seed) in &file.tenants {
        let tenant = TenantId::new(id.as_str());
        let store = store_for(&tenant)?;
        let provisioned = directory
            .provision_with_store(tenant.clone(), seed.config.clone(), store)
            .await;
        let handle = TenantHandle::new(tenant.clone(), provisioned.store);

        let mut work = UnitOfWork::new();
        let mut seeded = 0;
        seeded += insert_missing(&handle, &mut work, &seed.products).await?;
        seeded += insert_missing(&handle, &mut work, &seed.coupons).await?;
        seeded += insert_missing(&handle, &mut work, &seed.users).await?;
        handle.commit(work).await?;

        for credential in &seed.credentials {
            credentials.issue(
                tenant.clone(),
                credential.token.clone(),
                credential.identity(),
                credential.expires_at,
            );
        }
        info!(tenant = %tenant, seeded, credentials = seed.credentials.len(), "Tenant provisioned");
    }
    Ok(credentials)
}

async fn insert_missing<T: Record>(
    handle: &TenantHandle,
    work: &mut UnitOfWork,
    records: &[T],
) -> Result<usize> {
    let mut inserted = 0;
    for record in records {
        if handle.get::<T>(&record.record_id()).await?.is_none() {
            work.insert(record)?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Replaces a live tenant's configuration and drops its cached resolution,
/// so the next request sees the new settings.
pub async fn reconfigure(
    commerce: &Commerce,
    directory: &InMemoryTenantDirectory,
    tenant: &TenantId,
    config: TenantConfig,
) {
    directory.provision(tenant.clone(), config).await;
    commerce.invalidate_tenant(tenant).await;
    info!(tenant = %tenant, "Tenant reconfigured");
}
