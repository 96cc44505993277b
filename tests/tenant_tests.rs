mod common;

use common::{Harness, payment_request};
use ordercore::CommerceError;
use ordercore::application::context::RequestEnvelope;
use ordercore::domain::identity::Role;
use ordercore::domain::tenant::TenantId;
use ordercore::error::ErrorClass;
use ordercore::interfaces::provisioning::{TenantsFile, reconfigure};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_unknown_and_blank_tenants() {
    let h = Harness::new().await;

    for tenant in ["initech", "", "   "] {
        let err = h
            .commerce
            .begin(&RequestEnvelope::new(tenant))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CommerceError::UnknownTenant(_)), "{tenant:?}: {err:?}");
        assert_eq!(err.class(), ErrorClass::Tenant);
    }
}

#[tokio::test]
async fn test_offline_tenant_is_unavailable() {
    let h = Harness::new().await;
    let globex = TenantId::new("globex");
    h.directory.set_offline(&globex, true).await;

    let err = h
        .commerce
        .begin(&RequestEnvelope::new("globex"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CommerceError::TenantUnavailable(_)));

    h.directory.set_offline(&globex, false).await;
    let ctx = h.guest("globex").await;
    assert_eq!(ctx.tenant(), &globex);
}

#[tokio::test]
async fn test_credentials() {
    let h = Harness::new().await;

    let ctx = h.ctx("acme", "Bearer tok-root").await;
    assert_eq!(ctx.identity.role, Role::Admin);

    let guest = h.guest("acme").await;
    assert_eq!(guest.identity.role, Role::Anonymous);

    let err = h
        .commerce
        .begin(&RequestEnvelope::new("acme").with_credential("tok-nobody"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CommerceError::Unauthenticated(_)));

    // bob exists only in acme
    let err = h
        .commerce
        .begin(&RequestEnvelope::new("globex").with_credential("tok-bob"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CommerceError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_tenant_isolation() {
    let h = Harness::new().await;
    let acme = h.ctx("acme", "tok-alice").await;
    let globex = h.ctx("globex", "tok-alice").await;

    let acme_order = h.pending_order(&acme, "course", 1, None).await;
    assert_eq!(acme_order.currency.code(), "USD");
    assert_eq!(acme_order.total().value(), dec!(105));

    let globex_order = h.pending_order(&globex, "course", 1, None).await;
    assert_eq!(globex_order.currency.code(), "EUR");
    // No tax, flat shipping
    assert_eq!(globex_order.total().value(), dec!(84.90));

    let err = h.commerce.orders().view(&globex, &acme_order.id).await.unwrap_err();
    assert!(matches!(err, CommerceError::NotFound(_)));
    let err = h
        .commerce
        .payments()
        .preauthorize(&globex, &acme_order.id, payment_request(dec!(105), "pay-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::NotFound(_)));

    // Same idempotency key, different tenants: two independent payments
    let a = h
        .commerce
        .payments()
        .preauthorize(&acme, &acme_order.id, payment_request(dec!(105), "pay-1"))
        .await
        .unwrap();
    let g = h
        .commerce
        .payments()
        .preauthorize(&globex, &globex_order.id, payment_request(dec!(84.90), "pay-1"))
        .await
        .unwrap();
    assert_ne!(a.id, g.id);
    assert_eq!(g.currency.code(), "EUR");

    assert_eq!(h.commerce.orders().list(&acme, None).await.unwrap().len(), 1);
    assert_eq!(h.commerce.orders().list(&globex, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_currency_mismatch() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let order = h.pending_order(&alice, "course", 1, None).await;

    let mut request = payment_request(dec!(105), "pay-1");
    request.currency = Some(ordercore::domain::money::Currency::new("EUR").unwrap());
    let err = h
        .commerce
        .payments()
        .preauthorize(&alice, &order.id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::CurrencyMismatch { .. }));
    assert_eq!(h.gateway.calls().await.authorize, 0);
}

#[tokio::test]
async fn test_reconfigured_tenant_prices_new_orders_only() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let before = h.pending_order(&alice, "course", 1, None).await;

    let file: TenantsFile = serde_json::from_str(common::TENANTS).unwrap();
    let mut config = file.tenants["acme"].config.clone();
    config.tax.rate = dec!(0.20);
    reconfigure(&h.commerce, &h.directory, &TenantId::new("acme"), config).await;

    let alice = h.ctx("acme", "tok-alice").await;
    let after = h.pending_order(&alice, "course", 1, None).await;
    assert_eq!(after.total().value(), dec!(120));

    // Submitted orders keep the price they were submitted with
    let before = h.commerce.orders().view(&alice, &before.id).await.unwrap();
    assert_eq!(before.total().value(), dec!(105));
}
