use super::context::RequestContext;
use super::guard::{authorize, authorize_order_access};
use super::handle::{UnitOfWork, Versioned};
use super::pricing::{ItemRequest, PricingEngine};
use super::retry::{RetryPolicy, with_retry};
use crate::domain::identity::{Role, UserId};
use crate::domain::money::{Amount, Money};
use crate::domain::order::{Order, OrderState, OrderTransition};
use crate::domain::payment::{Payment, PaymentState};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Reacts to committed order state changes.
///
/// Called after the commit that caused the transition, never inside it.
/// Errors are logged by the publisher and do not undo the transition.
#[async_trait]
pub trait OrderObserver: Send + Sync {
    async fn order_changed(
        &self,
        ctx: &RequestContext,
        order: &Order,
        transition: OrderTransition,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOrder {
    pub items: Vec<ItemRequest>,
    pub coupon: Option<String>,
    pub email: Option<String>,
}

/// Admin changes to an order. `items` and `coupon` require an open order.
///
/// `coupon` is `None` to keep the requested coupon, `Some(None)` to drop it
/// and `Some(Some(code))` to replace it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub items: Option<Vec<ItemRequest>>,
    #[serde(default)]
    pub coupon: Option<Option<String>>,
    pub email: Option<String>,
}

/// Owns every order mutation.
///
/// The payment processor changes orders only through the `record_*` hooks,
/// inside its own unit of work, and publishes the returned transition.
pub struct OrderManager {
    pricing: PricingEngine,
    retry: RetryPolicy,
    observers: Vec<Arc<dyn OrderObserver>>,
}

impl OrderManager {
    pub fn new(pricing: PricingEngine, retry: RetryPolicy) -> Self {
        Self {
            pricing,
            retry,
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn OrderObserver>) {
        self.observers.push(observer);
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    /// Creates an open order owned by the caller, or a guest order for
    /// anonymous callers.
    #[instrument(skip(self, ctx, request), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn create(&self, ctx: &RequestContext, request: NewOrder) -> Result<Order> {
        if request.items.is_empty() {
            return Err(CommerceError::ValidationError(
                "order needs at least one item".to_string(),
            ));
        }
        let now = Utc::now();
        let items = self.pricing.line_items(&ctx.handle, &request.items).await?;
        let breakdown = self
            .pricing
            .quote(
                &ctx.handle,
                &ctx.config,
                &items,
                request.coupon.as_deref(),
                now,
            )
            .await?;

        let order = Order::new(
            Uuid::new_v4().to_string(),
            ctx.tenant().clone(),
            ctx.identity.user_id.clone(),
            request.email,
            ctx.config.currency.clone(),
            items,
            breakdown,
            request.coupon,
            now,
        );
        let mut work = UnitOfWork::new();
        work.insert(&order)?;
        ctx.handle.commit(work).await?;

        info!(order_id = %order.id, total = %order.total(), "Order created");
        Ok(order)
    }

    /// Freezes an open order's items and price, consuming its coupon.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn submit(&self, ctx: &RequestContext, order_id: &str) -> Result<Order> {
        let (order, transition) = with_retry(&self.retry, "submit_order", move || {
            self.submit_once(ctx, order_id)
        })
        .await?;

        info!(order_id = %order.id, state = %order.state, total = %order.total(), "Order submitted");
        self.publish(ctx, &order, transition).await;
        Ok(order)
    }

    async fn submit_once(
        &self,
        ctx: &RequestContext,
        order_id: &str,
    ) -> Result<(Order, OrderTransition)> {
        let mut order = ctx.handle.require::<Order>(order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;
        if order.state != OrderState::Open {
            return Err(CommerceError::InvalidState(format!(
                "cannot submit order {order_id} in state {}",
                order.state
            )));
        }

        let now = Utc::now();
        let pricing = self
            .pricing
            .price(
                &ctx.handle,
                &ctx.config,
                &order.items,
                order.requested_coupon.as_deref(),
                now,
            )
            .await?;

        let mut work = UnitOfWork::new();
        let applied = match pricing.coupon {
            Some(mut coupon) => {
                coupon.consume()?;
                work.update(&coupon)?;
                Some(coupon.snapshot())
            }
            None => None,
        };
        let transition = order.submit(pricing.breakdown, applied, now)?;
        work.update(&order)?;
        ctx.handle.commit(work).await?;
        Ok((order.value, transition))
    }

    /// Admin edit. Items and coupon may only change while the order is open.
    #[instrument(skip(self, ctx, update), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        order_id: &str,
        update: OrderUpdate,
    ) -> Result<Order> {
        authorize(&ctx.identity, Role::Admin)?;
        let update = &update;
        let order = with_retry(&self.retry, "update_order", move || async move {
            let mut order = ctx.handle.require::<Order>(order_id).await?;
            let now = Utc::now();

            if update.items.is_some() || update.coupon.is_some() {
                let items = match &update.items {
                    Some(requests) => self.pricing.line_items(&ctx.handle, requests).await?,
                    None => order.items.clone(),
                };
                let coupon = match &update.coupon {
                    Some(change) => change.clone(),
                    None => order.requested_coupon.clone(),
                };
                if order.state != OrderState::Open {
                    return Err(CommerceError::InvalidState(format!(
                        "cannot modify items of order {order_id} in state {}",
                        order.state
                    )));
                }
                let breakdown = self
                    .pricing
                    .quote(&ctx.handle, &ctx.config, &items, coupon.as_deref(), now)
                    .await?;
                order.replace_items(items, coupon, breakdown, now)?;
            }
            if let Some(email) = &update.email {
                order.email = Some(email.clone());
                order.updated_at = now;
            }

            let mut work = UnitOfWork::new();
            work.update(&order)?;
            ctx.handle.commit(work).await?;
            Ok(order.value)
        })
        .await?;

        info!(order_id = %order.id, "Order updated");
        Ok(order)
    }

    pub async fn view(&self, ctx: &RequestContext, order_id: &str) -> Result<Order> {
        let order = ctx.handle.require::<Order>(order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;
        Ok(order.value)
    }

    /// Non-admins see only their own orders; admins may filter by user.
    pub async fn list(&self, ctx: &RequestContext, user: Option<&UserId>) -> Result<Vec<Order>> {
        authorize(&ctx.identity, Role::User)?;
        let owner = if ctx.identity.is_admin() {
            user.cloned()
        } else {
            if user.is_some_and(|u| Some(u) != ctx.identity.user_id.as_ref()) {
                return Err(CommerceError::Forbidden(
                    "cannot list another user's orders".to_string(),
                ));
            }
            ctx.identity.user_id.clone()
        };

        let mut orders: Vec<Order> = ctx
            .handle
            .list::<Order>()
            .await?
            .into_iter()
            .map(|v| v.value)
            .filter(|o| owner.is_none() || o.owner == owner)
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    /// Cancels an open or pending order, voiding authorized payments with it.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn cancel(&self, ctx: &RequestContext, order_id: &str) -> Result<Order> {
        let (order, transition) = with_retry(&self.retry, "cancel_order", move || async move {
            let mut order = ctx.handle.require::<Order>(order_id).await?;
            authorize_order_access(&ctx.identity, order.owner.as_ref())?;

            let now = Utc::now();
            let mut work = UnitOfWork::new();
            for mut payment in self.payments_for(ctx, order_id).await? {
                match payment.state {
                    PaymentState::Initiated => {
                        return Err(CommerceError::InvalidState(format!(
                            "payment {} of order {order_id} is still in flight",
                            payment.id
                        )));
                    }
                    PaymentState::Authorized => {
                        payment.void(now)?;
                        work.update(&payment)?;
                    }
                    _ => {}
                }
            }
            let transition = order.cancel(now)?;
            work.update(&order)?;
            ctx.handle.commit(work).await?;
            Ok((order.value, transition))
        })
        .await?;

        info!(order_id = %order.id, "Order cancelled");
        self.publish(ctx, &order, transition).await;
        Ok(order)
    }

    /// Remaining amount before a new payment may start: `total - reserved`.
    pub fn amount_owed(&self, order: &Order) -> Money {
        order.amount_owed()
    }

    pub(crate) async fn payments_for(
        &self,
        ctx: &RequestContext,
        order_id: &str,
    ) -> Result<Vec<Versioned<Payment>>> {
        let mut payments: Vec<Versioned<Payment>> = ctx
            .handle
            .list::<Payment>()
            .await?
            .into_iter()
            .filter(|p| p.order_id == order_id)
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    pub(crate) fn record_reservation(
        &self,
        order: &mut Versioned<Order>,
        amount: Amount,
    ) -> Result<()> {
        order.reserve(amount, Utc::now())
    }

    pub(crate) fn release_reservation(&self, order: &mut Versioned<Order>, amount: Amount) {
        order.release(amount, Utc::now());
    }

    pub(crate) fn record_capture(
        &self,
        order: &mut Versioned<Order>,
        amount: Amount,
    ) -> Result<OrderTransition> {
        order.record_capture(amount, Utc::now())
    }

    pub(crate) fn record_refund(
        &self,
        order: &mut Versioned<Order>,
        amount: Amount,
    ) -> Result<OrderTransition> {
        order.record_refund(amount, Utc::now())
    }

    /// Notifies observers of a committed transition.
    pub(crate) async fn publish(
        &self,
        ctx: &RequestContext,
        order: &Order,
        transition: OrderTransition,
    ) {
        if transition == OrderTransition::Unchanged {
            return;
        }
        for observer in &self.observers {
            if let Err(e) = observer.order_changed(ctx, order, transition).await {
                warn!(order_id = %order.id, ?transition, error = %e, "Order observer failed");
            }
        }
    }
}
