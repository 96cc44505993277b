#![allow(dead_code)]

use async_trait::async_trait;
use ordercore::application::Commerce;
use ordercore::application::context::{CommerceConfig, RequestContext, RequestEnvelope};
use ordercore::application::orders::{NewOrder, OrderObserver};
use ordercore::application::payments::PaymentRequest;
use ordercore::application::pricing::ItemRequest;
use ordercore::application::retry::RetryPolicy;
use ordercore::domain::money::Amount;
use ordercore::domain::order::{Order, OrderTransition};
use ordercore::domain::ports::RecordStoreRef;
use ordercore::infrastructure::gateway::SimulatedGateway;
use ordercore::infrastructure::in_memory::{InMemoryRecordStore, InMemoryTenantDirectory};
use ordercore::interfaces::provisioning::{TenantsFile, provision};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Two tenants with the same catalog but different currencies. `acme`
/// charges 5% tax on the pre-discount subtotal and no shipping.
pub const TENANTS: &str = r#"{
    "tenants": {
        "acme": {
            "config": {
                "currency": "USD",
                "tax": { "rate": "0.05" },
                "shipping": { "flat": "0" },
                "gateway": { "provider": "simulated", "secret_key": "sk_acme" },
                "download_max_uses": 3
            },
            "credentials": [
                { "token": "tok-alice", "user": "alice", "role": "user" },
                { "token": "tok-bob", "user": "bob", "role": "user" },
                { "token": "tok-root", "user": "root", "role": "admin" }
            ],
            "products": [
                { "sku": "course", "name": "Course", "price": "100", "downloads": ["course.zip", "slides.pdf"] },
                { "sku": "mug", "name": "Mug", "price": "12.50" }
            ],
            "coupons": [
                { "code": "TEN", "rule": { "type": "percentage", "value": "10" } },
                { "code": "ONCE", "rule": { "type": "fixed", "value": "5" }, "usage_limit": 1 }
            ],
            "users": [
                { "id": "alice", "email": "alice@example.com", "role": "user" },
                { "id": "bob", "email": "bob@example.com", "role": "user" }
            ]
        },
        "globex": {
            "config": {
                "currency": "EUR",
                "tax": { "rate": "0" },
                "shipping": { "flat": "4.90" },
                "gateway": { "provider": "simulated" }
            },
            "credentials": [
                { "token": "tok-alice", "user": "alice", "role": "user" }
            ],
            "products": [
                { "sku": "course", "name": "Course", "price": "80" }
            ]
        }
    }
}"#;

/// Everything a test needs to drive the core and inspect its collaborators.
pub struct Harness {
    pub commerce: Commerce,
    pub directory: InMemoryTenantDirectory,
    pub gateway: SimulatedGateway,
    pub events: Arc<EventLog>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_gateway(SimulatedGateway::new(), Duration::from_secs(10)).await
    }

    pub async fn with_gateway(gateway: SimulatedGateway, gateway_timeout: Duration) -> Self {
        let file: TenantsFile = serde_json::from_str(TENANTS).unwrap();
        let directory = InMemoryTenantDirectory::new();
        let credentials = provision(&file, &directory, |_| {
            Ok(Arc::new(InMemoryRecordStore::new()) as RecordStoreRef)
        })
        .await
        .unwrap();

        let events = Arc::new(EventLog::default());
        let config = CommerceConfig {
            retry: RetryPolicy {
                max_attempts: 50,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
            },
            gateway_timeout,
            ..CommerceConfig::default()
        };
        let commerce = Commerce::builder(Arc::new(directory.clone()), Arc::new(credentials))
            .gateway("simulated", Arc::new(gateway.clone()))
            .observer(events.clone())
            .config(config)
            .build();

        Self {
            commerce,
            directory,
            gateway,
            events,
        }
    }

    pub async fn ctx(&self, tenant: &str, token: &str) -> RequestContext {
        self.commerce
            .begin(&RequestEnvelope::new(tenant).with_credential(token))
            .await
            .unwrap()
    }

    pub async fn guest(&self, tenant: &str) -> RequestContext {
        self.commerce.begin(&RequestEnvelope::new(tenant)).await.unwrap()
    }

    /// Creates and submits an order for `quantity` units of `sku`.
    pub async fn pending_order(
        &self,
        ctx: &RequestContext,
        sku: &str,
        quantity: u32,
        coupon: Option<&str>,
    ) -> Order {
        let order = self
            .commerce
            .orders()
            .create(
                ctx,
                NewOrder {
                    items: vec![ItemRequest::new(sku, quantity)],
                    coupon: coupon.map(str::to_string),
                    email: None,
                },
            )
            .await
            .unwrap();
        self.commerce.orders().submit(ctx, &order.id).await.unwrap()
    }

    /// Submits an order and pays it in full.
    pub async fn paid_order(&self, ctx: &RequestContext, sku: &str, coupon: Option<&str>) -> (Order, String) {
        let order = self.pending_order(ctx, sku, 1, coupon).await;
        let payment = self
            .commerce
            .payments()
            .preauthorize(ctx, &order.id, payment_request(order.total().value(), "pay-1"))
            .await
            .unwrap();
        self.commerce.payments().confirm(ctx, &payment.id).await.unwrap();
        let order = self.commerce.orders().view(ctx, &order.id).await.unwrap();
        (order, payment.id)
    }
}

pub fn payment_request(amount: Decimal, key: &str) -> PaymentRequest {
    PaymentRequest {
        amount: Amount::new(amount).unwrap(),
        currency: None,
        provider: None,
        idempotency_key: key.to_string(),
    }
}

/// Records every order notification.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<(String, OrderTransition)>>,
}

impl EventLog {
    pub async fn for_order(&self, order_id: &str) -> Vec<OrderTransition> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == order_id)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl OrderObserver for EventLog {
    async fn order_changed(
        &self,
        _ctx: &RequestContext,
        order: &Order,
        transition: OrderTransition,
    ) -> ordercore::Result<()> {
        self.events.lock().await.push((order.id.clone(), transition));
        Ok(())
    }
}
