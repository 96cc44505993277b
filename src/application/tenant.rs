use super::handle::TenantHandle;
use crate::domain::ports::TenantDirectory;
use crate::domain::tenant::{TenantConfig, TenantId};
use crate::error::{CommerceError, Result};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A tenant's data handle and configuration.
#[derive(Clone)]
pub struct ResolvedTenant {
    pub handle: TenantHandle,
    pub config: Arc<TenantConfig>,
}

/// Maps tenant identifiers to their isolated store and configuration.
///
/// Resolutions are cached for the process lifetime, bounded by capacity and
/// TTL; `invalidate` drops one tenant after its configuration changed.
#[derive(Clone)]
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    cache: Cache<TenantId, ResolvedTenant>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { directory, cache }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, tenant_id: &str) -> Result<ResolvedTenant> {
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(CommerceError::UnknownTenant("<empty>".to_string()));
        }
        let tenant = TenantId::new(tenant_id);

        if let Some(resolved) = self.cache.get(&tenant).await {
            return Ok(resolved);
        }

        let provisioned = match self.directory.lookup(&tenant).await {
            Ok(Some(provisioned)) => provisioned,
            Ok(None) => return Err(CommerceError::UnknownTenant(tenant.to_string())),
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Tenant lookup failed");
                return Err(match e {
                    CommerceError::TenantUnavailable(_) => e,
                    other => CommerceError::TenantUnavailable(format!("{tenant}: {other}")),
                });
            }
        };

        let resolved = ResolvedTenant {
            handle: TenantHandle::new(tenant.clone(), provisioned.store),
            config: Arc::new(provisioned.config),
        };
        self.cache.insert(tenant.clone(), resolved.clone()).await;
        debug!(tenant = %tenant, "Tenant resolved");
        Ok(resolved)
    }

    pub async fn invalidate(&self, tenant: &TenantId) {
        self.cache.invalidate(tenant).await;
    }
}
