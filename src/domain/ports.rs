use super::coupon::Coupon;
use super::download::DownloadGrant;
use super::identity::{Identity, User};
use super::money::{Amount, Currency, Money};
use super::order::{LineItem, Order};
use super::payment::Payment;
use super::product::Product;
use super::tenant::{GatewayConfig, TenantConfig, TenantId};
use crate::error::{FailureClass, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Collections held by a tenant's record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Order,
    Payment,
    Coupon,
    Product,
    User,
    DownloadGrant,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Order,
        RecordKind::Payment,
        RecordKind::Coupon,
        RecordKind::Product,
        RecordKind::User,
        RecordKind::DownloadGrant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Order => "orders",
            RecordKind::Payment => "payments",
            RecordKind::Coupon => "coupons",
            RecordKind::Product => "products",
            RecordKind::User => "users",
            RecordKind::DownloadGrant => "download_grants",
        }
    }
}

/// A serialized record and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub version: u64,
    pub data: Vec<u8>,
}

/// One write of a unit of work.
///
/// `expected_version` is `None` for inserts, which fail if the record exists.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
    pub kind: RecordKind,
    pub id: String,
    pub expected_version: Option<u64>,
    pub data: Vec<u8>,
}

/// Transactional storage for one tenant.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>>;
    async fn list(&self, kind: RecordKind) -> Result<Vec<StoredRecord>>;
    /// Applies every write or none of them. Fails with `StoreConflict` when
    /// any record's current version differs from the expected one.
    async fn commit(&self, writes: Vec<RecordWrite>) -> Result<()>;
}

pub type RecordStoreRef = Arc<dyn RecordStore>;

/// An entity persisted in a `RecordStore`.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const KIND: RecordKind;
    fn record_id(&self) -> String;
}

impl Record for Order {
    const KIND: RecordKind = RecordKind::Order;
    fn record_id(&self) -> String {
        self.id.clone()
    }
}

impl Record for Payment {
    const KIND: RecordKind = RecordKind::Payment;
    fn record_id(&self) -> String {
        self.id.clone()
    }
}

impl Record for Coupon {
    const KIND: RecordKind = RecordKind::Coupon;
    fn record_id(&self) -> String {
        self.code.clone()
    }
}

impl Record for Product {
    const KIND: RecordKind = RecordKind::Product;
    fn record_id(&self) -> String {
        self.sku.clone()
    }
}

impl Record for User {
    const KIND: RecordKind = RecordKind::User;
    fn record_id(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for DownloadGrant {
    const KIND: RecordKind = RecordKind::DownloadGrant;
    fn record_id(&self) -> String {
        self.id.clone()
    }
}

/// A provisioned tenant: its configuration and its isolated store.
#[derive(Clone)]
pub struct ProvisionedTenant {
    pub config: TenantConfig,
    pub store: RecordStoreRef,
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// `Ok(None)` for tenants that were never provisioned; `Err` when the
    /// tenant's backing store cannot be reached.
    async fn lookup(&self, tenant: &TenantId) -> Result<Option<ProvisionedTenant>>;
}

/// Turns a verified credential into the caller's identity.
pub trait CredentialDecoder: Send + Sync {
    fn decode(&self, tenant: &TenantId, credential: &str) -> Result<Identity>;
}

/// Tax and shipping terms. Both are opaque additive terms to the core.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn tax(&self, config: &TenantConfig, items: &[LineItem], subtotal: Money)
    -> Result<Money>;
    async fn shipping(&self, config: &TenantConfig, items: &[LineItem]) -> Result<Money>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayFailure {
    pub class: FailureClass,
    pub message: String,
}

impl GatewayFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Terminal,
            message: message.into(),
        }
    }
}

impl From<GatewayFailure> for crate::error::CommerceError {
    fn from(failure: GatewayFailure) -> Self {
        crate::error::CommerceError::GatewayError {
            class: failure.class,
            message: failure.message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizeRequest<'a> {
    pub credentials: &'a GatewayConfig,
    pub amount: Amount,
    pub currency: &'a Currency,
    pub idempotency_key: &'a str,
}

/// Payment gateway capability. Every verb is idempotent per key on the
/// gateway side and returns the gateway's reference token.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        request: AuthorizeRequest<'_>,
    ) -> std::result::Result<String, GatewayFailure>;
    async fn capture(
        &self,
        credentials: &GatewayConfig,
        gateway_ref: &str,
        amount: Amount,
    ) -> std::result::Result<String, GatewayFailure>;
    async fn refund(
        &self,
        credentials: &GatewayConfig,
        gateway_ref: &str,
        amount: Amount,
        idempotency_key: &str,
    ) -> std::result::Result<String, GatewayFailure>;
}

pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
