use super::context::RequestContext;
use super::guard::authorize_order_access;
use super::handle::{UnitOfWork, Versioned};
use super::orders::OrderObserver;
use super::retry::{RetryPolicy, with_retry};
use crate::domain::download::{DownloadAccess, DownloadGrant};
use crate::domain::order::{Order, OrderTransition};
use crate::domain::product::Product;
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

/// Issues, refreshes and redeems download entitlements of paid orders.
pub struct DownloadIssuer {
    retry: RetryPolicy,
}

impl DownloadIssuer {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Grants every downloadable asset of a paid order. Existing grants get
    /// a fresh expiry instead of a duplicate.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn issue_or_refresh(
        &self,
        ctx: &RequestContext,
        order_id: &str,
    ) -> Result<Vec<DownloadAccess>> {
        let order = ctx.handle.require::<Order>(order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;
        self.grant(ctx, &order).await
    }

    async fn grant(&self, ctx: &RequestContext, order: &Order) -> Result<Vec<DownloadAccess>> {
        if !order.state.is_entitled() {
            return Err(CommerceError::InvalidState(format!(
                "order {} in state {} has no download entitlement",
                order.id, order.state
            )));
        }

        let mut assets = Vec::new();
        for item in &order.items {
            match ctx.handle.get::<Product>(&item.sku).await? {
                Some(product) => {
                    for asset in &product.downloads {
                        if !assets.contains(asset) {
                            assets.push(asset.clone());
                        }
                    }
                }
                None => warn!(order_id = %order.id, sku = %item.sku, "Ordered product no longer exists"),
            }
        }
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let assets = &assets;
        let grants = with_retry(&self.retry, "issue_downloads", move || async move {
            let now = Utc::now();
            let expires_at = i64::try_from(ctx.config.download_ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let mut work = UnitOfWork::new();
            let mut grants = Vec::with_capacity(assets.len());
            for asset in assets {
                let key = DownloadGrant::key(&order.id, asset);
                match ctx.handle.get::<DownloadGrant>(&key).await? {
                    Some(mut grant) => {
                        grant.refresh(expires_at);
                        grant.revoked = false;
                        work.update(&grant)?;
                        grants.push(grant.value);
                    }
                    None => {
                        let grant = DownloadGrant::new(
                            &order.id,
                            asset,
                            expires_at,
                            ctx.config.download_max_uses,
                            now,
                        );
                        work.insert(&grant)?;
                        grants.push(grant);
                    }
                }
            }
            ctx.handle.commit(work).await?;
            Ok(grants)
        })
        .await?;

        info!(order_id = %order.id, grants = grants.len(), "Downloads issued");
        Ok(grants.iter().map(DownloadAccess::from).collect())
    }

    /// Live grants of an order. A refunded or cancelled order has none, even
    /// if revoking its grants has not caught up yet.
    pub async fn list(&self, ctx: &RequestContext, order_id: &str) -> Result<Vec<DownloadAccess>> {
        let order = ctx.handle.require::<Order>(order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;
        if !order.state.is_entitled() {
            return Ok(Vec::new());
        }
        Ok(self
            .grants_for(ctx, order_id)
            .await?
            .iter()
            .filter(|g| !g.revoked)
            .map(|g| DownloadAccess::from(&g.value))
            .collect())
    }

    /// Counts one download against a grant.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn redeem(&self, ctx: &RequestContext, grant_id: &str) -> Result<DownloadAccess> {
        let grant = ctx.handle.require::<DownloadGrant>(grant_id).await?;
        let order = ctx.handle.require::<Order>(&grant.order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;
        if !order.state.is_entitled() {
            return Err(CommerceError::Forbidden(format!(
                "order {} in state {} no longer entitles downloads",
                order.id, order.state
            )));
        }

        let access = with_retry(&self.retry, "redeem_download", move || async move {
            let mut grant = ctx.handle.require::<DownloadGrant>(grant_id).await?;
            grant.redeem(Utc::now())?;
            let mut work = UnitOfWork::new();
            work.update(&grant)?;
            ctx.handle.commit(work).await?;
            Ok(DownloadAccess::from(&grant.value))
        })
        .await?;
        debug!(grant_id, remaining = ?access.remaining_uses, "Download redeemed");
        Ok(access)
    }

    async fn revoke(&self, ctx: &RequestContext, order_id: &str) -> Result<()> {
        let revoked = with_retry(&self.retry, "revoke_downloads", move || async move {
            let mut work = UnitOfWork::new();
            let mut count = 0usize;
            for mut grant in self.grants_for(ctx, order_id).await? {
                if !grant.revoked {
                    grant.revoked = true;
                    work.update(&grant)?;
                    count += 1;
                }
            }
            ctx.handle.commit(work).await?;
            Ok(count)
        })
        .await?;
        info!(order_id, revoked, "Downloads revoked");
        Ok(())
    }

    async fn grants_for(
        &self,
        ctx: &RequestContext,
        order_id: &str,
    ) -> Result<Vec<Versioned<DownloadGrant>>> {
        Ok(ctx
            .handle
            .list::<DownloadGrant>()
            .await?
            .into_iter()
            .filter(|g| g.order_id == order_id)
            .collect())
    }
}

#[async_trait]
impl OrderObserver for DownloadIssuer {
    async fn order_changed(
        &self,
        ctx: &RequestContext,
        order: &Order,
        transition: OrderTransition,
    ) -> Result<()> {
        match transition {
            OrderTransition::Paid => self.grant(ctx, order).await.map(|_| ()),
            OrderTransition::Refunded => self.revoke(ctx, &order.id).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handle::TenantHandle;
    use crate::domain::identity::Identity;
    use crate::domain::money::{Amount, Currency, Money};
    use crate::domain::order::{LineItem, OrderState, PriceBreakdown};
    use crate::domain::tenant::{GatewayConfig, ShippingRule, TaxRule, TenantConfig, TenantId};
    use crate::infrastructure::in_memory::InMemoryRecordStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn context(identity: Identity, max_uses: Option<u32>) -> RequestContext {
        let handle = TenantHandle::new(TenantId::new("acme"), Arc::new(InMemoryRecordStore::new()));
        let mut work = UnitOfWork::new();
        work.insert(&Product {
            sku: "ebook".into(),
            name: "Ebook".into(),
            price: Money::new(dec!(20)).unwrap(),
            downloads: vec!["ebook.pdf".into(), "ebook.epub".into()],
        })
        .unwrap();
        handle.commit(work).await.unwrap();
        let config = TenantConfig {
            currency: Currency::new("USD").unwrap(),
            tax: TaxRule { rate: dec!(0) },
            shipping: ShippingRule { flat: Money::ZERO },
            gateway: GatewayConfig {
                provider: "simulated".into(),
                secret_key: String::new(),
            },
            download_ttl_secs: 3600,
            download_max_uses: max_uses,
        };
        RequestContext::new(handle, Arc::new(config), identity)
    }

    async fn paid_order(ctx: &RequestContext) -> Order {
        let now = Utc::now();
        let price = Money::new(dec!(20)).unwrap();
        let mut order = Order::new(
            "o-1".into(),
            ctx.tenant().clone(),
            ctx.identity.user_id.clone(),
            None,
            ctx.config.currency.clone(),
            vec![LineItem {
                sku: "ebook".into(),
                quantity: 1,
                unit_price: price,
            }],
            PriceBreakdown::new(price, Money::ZERO, Money::ZERO, Money::ZERO),
            None,
            now,
        );
        let breakdown = order.breakdown.clone();
        order.submit(breakdown, None, now).unwrap();
        let amount = Amount::new(dec!(20)).unwrap();
        order.reserve(amount, now).unwrap();
        order.record_capture(amount, now).unwrap();
        let mut work = UnitOfWork::new();
        work.insert(&order).unwrap();
        ctx.handle.commit(work).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_issue_is_idempotent_per_asset() {
        let ctx = context(Identity::user("alice"), None).await;
        let order = paid_order(&ctx).await;
        let issuer = DownloadIssuer::new(RetryPolicy::default());

        let first = issuer.issue_or_refresh(&ctx, &order.id).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = issuer.issue_or_refresh(&ctx, &order.id).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].expires_at >= first[0].expires_at);

        assert_eq!(ctx.handle.list::<DownloadGrant>().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unpaid_order_has_no_entitlement() {
        let ctx = context(Identity::user("alice"), None).await;
        let price = Money::new(dec!(20)).unwrap();
        let order = Order::new(
            "o-2".into(),
            ctx.tenant().clone(),
            ctx.identity.user_id.clone(),
            None,
            ctx.config.currency.clone(),
            vec![],
            PriceBreakdown::new(price, Money::ZERO, Money::ZERO, Money::ZERO),
            None,
            Utc::now(),
        );
        let mut work = UnitOfWork::new();
        work.insert(&order).unwrap();
        ctx.handle.commit(work).await.unwrap();

        let issuer = DownloadIssuer::new(RetryPolicy::default());
        assert_eq!(order.state, OrderState::Open);
        assert!(matches!(
            issuer.issue_or_refresh(&ctx, "o-2").await,
            Err(CommerceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_redeem_and_revoke() {
        let ctx = context(Identity::user("alice"), Some(1)).await;
        let order = paid_order(&ctx).await;
        let issuer = DownloadIssuer::new(RetryPolicy::default());
        issuer
            .order_changed(&ctx, &order, OrderTransition::Paid)
            .await
            .unwrap();

        let grants = issuer.list(&ctx, &order.id).await.unwrap();
        let grant_id = grants[0].grant_id.clone();
        let access = issuer.redeem(&ctx, &grant_id).await.unwrap();
        assert_eq!(access.remaining_uses, Some(0));
        assert!(matches!(
            issuer.redeem(&ctx, &grant_id).await,
            Err(CommerceError::DownloadExhausted(_))
        ));

        issuer
            .order_changed(&ctx, &order, OrderTransition::Refunded)
            .await
            .unwrap();
        assert!(issuer.list(&ctx, &order.id).await.unwrap().is_empty());
        assert!(matches!(
            issuer.redeem(&ctx, &grants[1].grant_id).await,
            Err(CommerceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_refunded_order_blocks_unrevoked_grants() {
        let ctx = context(Identity::user("alice"), None).await;
        let order = paid_order(&ctx).await;
        let issuer = DownloadIssuer::new(RetryPolicy::default());
        let grants = issuer.issue_or_refresh(&ctx, &order.id).await.unwrap();

        // Fully refunded without the observer ever revoking the grants
        let mut stored = ctx.handle.require::<Order>(&order.id).await.unwrap();
        stored
            .record_refund(Amount::new(dec!(20)).unwrap(), Utc::now())
            .unwrap();
        assert_eq!(stored.state, OrderState::Refunded);
        let mut work = UnitOfWork::new();
        work.update(&stored).unwrap();
        ctx.handle.commit(work).await.unwrap();
        assert!(
            ctx.handle
                .list::<DownloadGrant>()
                .await
                .unwrap()
                .iter()
                .all(|g| !g.revoked)
        );

        assert!(matches!(
            issuer.redeem(&ctx, &grants[0].grant_id).await,
            Err(CommerceError::Forbidden(_))
        ));
        assert!(issuer.list(&ctx, &order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_users_cannot_redeem() {
        let ctx = context(Identity::user("alice"), None).await;
        let order = paid_order(&ctx).await;
        let issuer = DownloadIssuer::new(RetryPolicy::default());
        let grants = issuer.issue_or_refresh(&ctx, &order.id).await.unwrap();

        let bob = RequestContext::new(ctx.handle.clone(), ctx.config.clone(), Identity::user("bob"));
        assert!(matches!(
            issuer.redeem(&bob, &grants[0].grant_id).await,
            Err(CommerceError::Forbidden(_))
        ));
    }
}
