use super::money::{Currency, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRule {
    /// Fraction of the pre-discount subtotal, e.g. `0.05` for 5%.
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingRule {
    pub flat: Money,
}

/// Payment provider credentials for one tenant.
///
/// Implements `Debug` manually to redact the secret.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub provider: String,
    #[serde(default)]
    pub secret_key: String,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("provider", &self.provider)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

fn default_download_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Per-tenant settings resolved alongside the tenant's data handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub currency: Currency,
    pub tax: TaxRule,
    pub shipping: ShippingRule,
    pub gateway: GatewayConfig,
    #[serde(default = "default_download_ttl_secs")]
    pub download_ttl_secs: u64,
    #[serde(default)]
    pub download_max_uses: Option<u32>,
}
