mod common;

use common::{Harness, payment_request};
use ordercore::CommerceError;
use ordercore::domain::identity::UserId;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_payment_listings() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let bob = h.ctx("acme", "tok-bob").await;
    let root = h.ctx("acme", "tok-root").await;

    let (_, alice_payment) = h.paid_order(&alice, "course", None).await;
    let (_, bob_payment) = h.paid_order(&bob, "mug", None).await;
    let guest = h.guest("acme").await;
    let guest_order = h.pending_order(&guest, "mug", 1, None).await;
    h.commerce
        .payments()
        .preauthorize(&guest, &guest_order.id, payment_request(dec!(13.13), "guest-1"))
        .await
        .unwrap();

    let all = h.commerce.payments().list(&root).await.unwrap();
    assert_eq!(all.len(), 3);
    let err = h.commerce.payments().list(&alice).await.unwrap_err();
    assert!(matches!(err, CommerceError::Forbidden(_)));

    let alice_id = UserId::new("alice");
    let own = h
        .commerce
        .payments()
        .list_for_user(&alice, &alice_id)
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].id, alice_payment);

    let bobs = h
        .commerce
        .payments()
        .list_for_user(&root, &UserId::new("bob"))
        .await
        .unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].id, bob_payment);

    let err = h
        .commerce
        .payments()
        .list_for_user(&bob, &alice_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Forbidden(_)));
}

#[tokio::test]
async fn test_coupon_lookup() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let root = h.ctx("acme", "tok-root").await;
    let guest = h.guest("acme").await;

    let ten = h.commerce.coupons().view(&guest, "TEN").await.unwrap();
    assert_eq!(ten.code, "TEN");
    let err = h.commerce.coupons().view(&guest, "NOPE").await.unwrap_err();
    assert!(matches!(err, CommerceError::CouponNotFound(_)));

    // Once used up, only admins still see it
    h.paid_order(&alice, "mug", Some("ONCE")).await;
    let err = h.commerce.coupons().view(&alice, "ONCE").await.unwrap_err();
    assert!(matches!(err, CommerceError::CouponExhausted(_)));
    let once = h.commerce.coupons().view(&root, "ONCE").await.unwrap();
    assert_eq!(once.usage_count, 1);

    let codes: Vec<_> = h
        .commerce
        .coupons()
        .list(&root)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.code)
        .collect();
    assert_eq!(codes, ["ONCE", "TEN"]);
    let err = h.commerce.coupons().list(&alice).await.unwrap_err();
    assert!(matches!(err, CommerceError::Forbidden(_)));
}

#[tokio::test]
async fn test_user_list_is_admin_only() {
    let h = Harness::new().await;
    let alice = h.ctx("acme", "tok-alice").await;
    let root = h.ctx("acme", "tok-root").await;

    let ids: Vec<_> = h
        .commerce
        .users()
        .list(&root)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(ids, [UserId::new("alice"), UserId::new("bob")]);

    let err = h.commerce.users().list(&alice).await.unwrap_err();
    assert!(matches!(err, CommerceError::Forbidden(_)));
}
