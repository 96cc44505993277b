mod common;

use common::Harness;
use ordercore::CommerceError;
use ordercore::application::payments::RefundRequest;
use ordercore::domain::money::Amount;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_payment_grants_downloads() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let (order, _) = h.paid_order(&alice, "course", None).await;

    let grants = h.commerce.downloads().list(&alice, &order.id).await.unwrap();
    let mut assets: Vec<_> = grants.iter().map(|g| g.asset.as_str()).collect();
    assets.sort_unstable();
    assert_eq!(assets, ["course.zip", "slides.pdf"]);
    assert!(grants.iter().all(|g| g.remaining_uses == Some(3)));

    // Refreshing keeps one grant per asset
    let refreshed = h
        .commerce
        .downloads()
        .issue_or_refresh(&alice, &order.id)
        .await
        .unwrap();
    assert_eq!(refreshed.len(), 2);
    assert_eq!(h.commerce.downloads().list(&alice, &order.id).await.unwrap().len(), 2);

    let bob = h.ctx("acme", "tok-bob").await;
    let err = h
        .commerce
        .downloads()
        .redeem(&bob, &grants[0].grant_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Forbidden(_)));
}

#[tokio::test]
async fn test_redeem_until_exhausted() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let (order, _) = h.paid_order(&alice, "course", None).await;
    let grant = h.commerce.downloads().list(&alice, &order.id).await.unwrap()[0].clone();

    for remaining in [2, 1, 0] {
        let access = h
            .commerce
            .downloads()
            .redeem(&alice, &grant.grant_id)
            .await
            .unwrap();
        assert_eq!(access.remaining_uses, Some(remaining));
    }
    let err = h
        .commerce
        .downloads()
        .redeem(&alice, &grant.grant_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::DownloadExhausted(_)));
}

#[tokio::test]
async fn test_unpaid_order_has_no_downloads() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let order = h.pending_order(&alice, "course", 1, None).await;

    let err = h
        .commerce
        .downloads()
        .issue_or_refresh(&alice, &order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::InvalidState(_)));
    assert!(h.commerce.downloads().list(&alice, &order.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_refund_revokes_downloads() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let root = h.ctx("acme", "tok-root").await;
    let (order, payment_id) = h.paid_order(&alice, "course", None).await;
    let grant = h.commerce.downloads().list(&alice, &order.id).await.unwrap()[0].clone();

    // A partial refund keeps the entitlement
    let partial = RefundRequest {
        amount: Amount::new(dec!(5)).unwrap(),
        idempotency_key: "refund-1".into(),
    };
    h.commerce.payments().refund(&root, &payment_id, partial).await.unwrap();
    assert_eq!(h.commerce.downloads().list(&alice, &order.id).await.unwrap().len(), 2);

    let rest = RefundRequest {
        amount: Amount::new(dec!(100)).unwrap(),
        idempotency_key: "refund-2".into(),
    };
    h.commerce.payments().refund(&root, &payment_id, rest).await.unwrap();
    assert!(h.commerce.downloads().list(&alice, &order.id).await.unwrap().is_empty());

    let err = h
        .commerce
        .downloads()
        .redeem(&alice, &grant.grant_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Forbidden(_)));
}

#[tokio::test]
async fn test_products_without_assets_grant_nothing() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let (order, _) = h.paid_order(&alice, "mug", None).await;

    let grants = h
        .commerce
        .downloads()
        .issue_or_refresh(&alice, &order.id)
        .await
        .unwrap();
    assert!(grants.is_empty());
}
