use super::handle::TenantHandle;
use super::retry::RetryPolicy;
use crate::domain::identity::Identity;
use crate::domain::tenant::{TenantConfig, TenantId};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Process-wide tuning for the commerce core.
#[derive(Debug, Clone)]
pub struct CommerceConfig {
    pub retry: RetryPolicy,
    /// Upper bound for a single gateway call.
    pub gateway_timeout: Duration,
    pub tenant_cache_capacity: u64,
    pub tenant_cache_ttl: Duration,
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            gateway_timeout: Duration::from_secs(10),
            tenant_cache_capacity: 1_000,
            tenant_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// What the transport layer extracts from an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestEnvelope {
    pub tenant_id: String,
    pub credential: Option<String>,
}

impl RequestEnvelope {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

/// Everything one request needs, passed explicitly to each operation.
///
/// Built once per request by `Commerce::begin`; carries no state that
/// outlives the request.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub handle: TenantHandle,
    pub config: Arc<TenantConfig>,
    pub identity: Identity,
}

impl RequestContext {
    pub fn new(handle: TenantHandle, config: Arc<TenantConfig>, identity: Identity) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            handle,
            config,
            identity,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        self.handle.tenant()
    }
}
