//! Application layer: the components that drive orders and payments.
//!
//! `Commerce` wires them together. Each inbound request is turned into a
//! `RequestContext` by `Commerce::begin` (tenant resolution, then identity)
//! and that context is passed explicitly to every operation.

pub mod context;
pub mod coupons;
pub mod downloads;
pub mod guard;
pub mod handle;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod retry;
pub mod tenant;
pub mod users;

use crate::domain::ports::{
    CredentialDecoder, PaymentGatewayRef, RateProvider, TenantDirectory,
};
use crate::domain::tenant::TenantId;
use crate::error::Result;
use crate::infrastructure::rates::ConfiguredRates;
use context::{CommerceConfig, RequestContext, RequestEnvelope};
use coupons::CouponService;
use downloads::DownloadIssuer;
use orders::{OrderManager, OrderObserver};
use payments::PaymentProcessor;
use pricing::PricingEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tenant::TenantResolver;
use tracing::debug;
use users::UserService;

pub struct CommerceBuilder {
    directory: Arc<dyn TenantDirectory>,
    decoder: Arc<dyn CredentialDecoder>,
    rates: Arc<dyn RateProvider>,
    gateways: HashMap<String, PaymentGatewayRef>,
    observers: Vec<Arc<dyn OrderObserver>>,
    config: CommerceConfig,
}

impl CommerceBuilder {
    /// Tax and shipping provider. Defaults to `ConfiguredRates`.
    pub fn rates(mut self, rates: Arc<dyn RateProvider>) -> Self {
        self.rates = rates;
        self
    }

    /// Registers a gateway under the provider name tenants refer to.
    pub fn gateway(mut self, provider: impl Into<String>, gateway: PaymentGatewayRef) -> Self {
        self.gateways.insert(provider.into(), gateway);
        self
    }

    /// Adds an observer notified after the download issuer.
    pub fn observer(mut self, observer: Arc<dyn OrderObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(mut self, config: CommerceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Commerce {
        let config = self.config;
        let downloads = Arc::new(DownloadIssuer::new(config.retry));

        let mut orders = OrderManager::new(PricingEngine::new(self.rates), config.retry);
        orders.subscribe(downloads.clone());
        for observer in self.observers {
            orders.subscribe(observer);
        }
        let orders = Arc::new(orders);

        let payments = Arc::new(PaymentProcessor::new(
            orders.clone(),
            self.gateways,
            config.retry,
            config.gateway_timeout,
        ));

        Commerce {
            resolver: TenantResolver::new(
                self.directory,
                config.tenant_cache_capacity,
                config.tenant_cache_ttl,
            ),
            decoder: self.decoder,
            orders,
            payments,
            downloads,
            coupons: Arc::new(CouponService::new()),
            users: Arc::new(UserService::new(config.retry)),
        }
    }
}

/// The assembled core. Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct Commerce {
    resolver: TenantResolver,
    decoder: Arc<dyn CredentialDecoder>,
    orders: Arc<OrderManager>,
    payments: Arc<PaymentProcessor>,
    downloads: Arc<DownloadIssuer>,
    coupons: Arc<CouponService>,
    users: Arc<UserService>,
}

impl Commerce {
    pub fn builder(
        directory: Arc<dyn TenantDirectory>,
        decoder: Arc<dyn CredentialDecoder>,
    ) -> CommerceBuilder {
        CommerceBuilder {
            directory,
            decoder,
            rates: Arc::new(ConfiguredRates),
            gateways: HashMap::new(),
            observers: Vec::new(),
            config: CommerceConfig::default(),
        }
    }

    /// Resolves the tenant, then the caller's identity. A request without
    /// credential proceeds as anonymous; a bad credential fails.
    pub async fn begin(&self, envelope: &RequestEnvelope) -> Result<RequestContext> {
        let resolved = self.resolver.resolve(&envelope.tenant_id).await?;
        let identity = guard::identify(
            self.decoder.as_ref(),
            resolved.handle.tenant(),
            envelope.credential.as_deref(),
        )?;
        let ctx = RequestContext::new(resolved.handle, resolved.config, identity);
        debug!(tenant = %ctx.tenant(), request_id = %ctx.request_id, role = ?ctx.identity.role, "Request context ready");
        Ok(ctx)
    }

    /// Drops the cached resolution of a tenant whose configuration changed.
    pub async fn invalidate_tenant(&self, tenant: &TenantId) {
        self.resolver.invalidate(tenant).await;
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn payments(&self) -> &PaymentProcessor {
        &self.payments
    }

    pub fn downloads(&self) -> &DownloadIssuer {
        &self.downloads
    }

    pub fn coupons(&self) -> &CouponService {
        &self.coupons
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }
}
