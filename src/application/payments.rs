use super::context::RequestContext;
use super::guard::{authorize, authorize_order_access, authorize_owner_or_admin};
use super::handle::UnitOfWork;
use super::orders::OrderManager;
use super::retry::{RetryPolicy, with_retry};
use crate::domain::identity::{Role, UserId};
use crate::domain::money::{Amount, Currency, Money};
use crate::domain::order::{Order, OrderState};
use crate::domain::payment::{Payment, PaymentState, Refund, RefundState};
use crate::domain::ports::{AuthorizeRequest, GatewayFailure, PaymentGatewayRef};
use crate::error::{CommerceError, FailureClass, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Amount,
    /// Defaults to the order currency.
    pub currency: Option<Currency>,
    /// Defaults to the tenant's configured provider.
    pub provider: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub amount: Amount,
    pub idempotency_key: String,
}

enum Reservation {
    Existing(Payment),
    Created(Payment),
}

/// Drives payments through authorization, capture, refund and void.
///
/// Gateway calls always happen outside a commit and under
/// `gateway_timeout`. The outcome is then recorded by a separate, retried
/// unit of work that re-reads the payment, so at-least-once delivery of
/// the same request has at most one effect.
pub struct PaymentProcessor {
    orders: Arc<OrderManager>,
    gateways: HashMap<String, PaymentGatewayRef>,
    retry: RetryPolicy,
    gateway_timeout: Duration,
}

impl PaymentProcessor {
    pub fn new(
        orders: Arc<OrderManager>,
        gateways: HashMap<String, PaymentGatewayRef>,
        retry: RetryPolicy,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            gateways,
            retry,
            gateway_timeout,
        }
    }

    fn gateway(&self, provider: &str) -> Result<&PaymentGatewayRef> {
        self.gateways.get(provider).ok_or_else(|| {
            CommerceError::ValidationError(format!("unknown payment provider {provider}"))
        })
    }

    async fn call_gateway<F>(&self, verb: &str, call: F) -> std::result::Result<String, GatewayFailure>
    where
        F: Future<Output = std::result::Result<String, GatewayFailure>>,
    {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayFailure::transient(format!(
                "{verb} timed out after {}ms",
                self.gateway_timeout.as_millis()
            ))),
        }
    }

    /// Starts a payment for exactly the amount still owed on the order.
    ///
    /// Replaying an idempotency key returns the payment it created, and
    /// re-drives its authorization if the earlier attempt never finished.
    #[instrument(skip(self, ctx, request), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id, key = %request.idempotency_key))]
    pub async fn preauthorize(
        &self,
        ctx: &RequestContext,
        order_id: &str,
        request: PaymentRequest,
    ) -> Result<Payment> {
        let order = ctx.handle.require::<Order>(order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;

        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| ctx.config.gateway.provider.clone());
        self.gateway(&provider)?;

        let request = &request;
        let provider = provider.as_str();
        let reservation = with_retry(&self.retry, "reserve_payment", move || async move {
            self.reserve_once(ctx, order_id, request, provider).await
        })
        .await?;

        let payment = match reservation {
            Reservation::Existing(payment) if payment.state != PaymentState::Initiated => {
                return Ok(payment);
            }
            Reservation::Existing(payment) => payment,
            Reservation::Created(payment) => {
                info!(payment_id = %payment.id, order_id, amount = %payment.amount.value(), "Payment initiated");
                payment
            }
        };
        self.drive_authorization(ctx, payment).await
    }

    async fn reserve_once(
        &self,
        ctx: &RequestContext,
        order_id: &str,
        request: &PaymentRequest,
        provider: &str,
    ) -> Result<Reservation> {
        // Read the order before the payments: a reservation committed in
        // between then shows up as a version conflict, not a mismatch.
        let mut order = ctx.handle.require::<Order>(order_id).await?;
        if let Some(existing) = self
            .orders
            .payments_for(ctx, order_id)
            .await?
            .into_iter()
            .find(|p| p.idempotency_key == request.idempotency_key)
        {
            if existing.amount != request.amount {
                return Err(CommerceError::ValidationError(format!(
                    "idempotency key {} was used for a different amount",
                    request.idempotency_key
                )));
            }
            return Ok(Reservation::Existing(existing.value));
        }

        if order.state != OrderState::PendingPayment {
            return Err(CommerceError::OrderNotPending(order_id.to_string()));
        }
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| order.currency.clone());
        if currency != order.currency {
            return Err(CommerceError::CurrencyMismatch {
                expected: order.currency.to_string(),
                actual: currency.to_string(),
            });
        }
        self.orders.record_reservation(&mut order, request.amount)?;

        let payment = Payment::new(
            Uuid::new_v4().to_string(),
            order_id.to_string(),
            request.amount,
            currency,
            provider.to_string(),
            request.idempotency_key.clone(),
            Utc::now(),
        );
        let mut work = UnitOfWork::new();
        work.update(&order)?;
        work.insert(&payment)?;
        ctx.handle.commit(work).await?;
        Ok(Reservation::Created(payment))
    }

    async fn drive_authorization(&self, ctx: &RequestContext, payment: Payment) -> Result<Payment> {
        let gateway = self.gateway(&payment.provider)?;
        // The gateway is keyed by payment id: callers choose their keys per
        // order, so the same key on two orders must not share an authorization.
        let outcome = self
            .call_gateway(
                "authorize",
                gateway.authorize(AuthorizeRequest {
                    credentials: &ctx.config.gateway,
                    amount: payment.amount,
                    currency: &payment.currency,
                    idempotency_key: &payment.id,
                }),
            )
            .await;

        let payment_id = payment.id.as_str();
        match outcome {
            Ok(reference) => {
                let reference = reference.as_str();
                let authorized = with_retry(&self.retry, "authorize_payment", move || async move {
                    let mut payment = ctx.handle.require::<Payment>(payment_id).await?;
                    if payment.state != PaymentState::Initiated {
                        return Ok(payment.value);
                    }
                    payment.authorize(reference.to_string(), Utc::now())?;
                    let mut work = UnitOfWork::new();
                    work.update(&payment)?;
                    ctx.handle.commit(work).await?;
                    Ok(payment.value)
                })
                .await?;
                info!(payment_id, state = %authorized.state, "Payment authorized");
                Ok(authorized)
            }
            Err(failure) if failure.class == FailureClass::Terminal => {
                let reason = failure.message.as_str();
                with_retry(&self.retry, "fail_payment", move || async move {
                    let mut payment = ctx.handle.require::<Payment>(payment_id).await?;
                    if payment.state != PaymentState::Initiated {
                        return Ok(());
                    }
                    let mut order = ctx.handle.require::<Order>(&payment.order_id).await?;
                    payment.fail(reason.to_string(), Utc::now())?;
                    self.orders.release_reservation(&mut order, payment.amount);
                    let mut work = UnitOfWork::new();
                    work.update(&payment)?;
                    work.update(&order)?;
                    ctx.handle.commit(work).await
                })
                .await?;
                warn!(payment_id, reason, "Payment declined");
                Err(failure.into())
            }
            Err(failure) => {
                warn!(payment_id, reason = %failure.message, "Authorization incomplete, retry with the same key");
                Err(failure.into())
            }
        }
    }

    /// Captures an authorized payment.
    ///
    /// Safe to call repeatedly: a payment that is already captured is
    /// returned as stored, without a gateway call or order notification.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn confirm(&self, ctx: &RequestContext, payment_id: &str) -> Result<Payment> {
        let payment = ctx.handle.require::<Payment>(payment_id).await?;
        let order = ctx.handle.require::<Order>(&payment.order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;
        self.capture(ctx, payment.value).await
    }

    /// Gateway callback form of `confirm`, keyed by the authorization
    /// reference. The reference itself identifies the caller.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn confirm_by_reference(
        &self,
        ctx: &RequestContext,
        gateway_ref: &str,
    ) -> Result<Payment> {
        let payment = ctx
            .handle
            .list::<Payment>()
            .await?
            .into_iter()
            .find(|p| p.gateway_ref.as_deref() == Some(gateway_ref))
            .ok_or_else(|| CommerceError::NotFound(format!("Payment with reference {gateway_ref}")))?;
        self.capture(ctx, payment.value).await
    }

    async fn capture(&self, ctx: &RequestContext, payment: Payment) -> Result<Payment> {
        match payment.state {
            PaymentState::Captured | PaymentState::Refunded => return Ok(payment),
            PaymentState::Authorized => {}
            state => {
                return Err(CommerceError::InvalidState(format!(
                    "cannot confirm payment {} in state {state}",
                    payment.id
                )));
            }
        }
        let gateway_ref = payment.gateway_ref.clone().ok_or_else(|| {
            CommerceError::internal(format!("authorized payment {} has no reference", payment.id))
        })?;

        let gateway = self.gateway(&payment.provider)?;
        let capture_ref = self
            .call_gateway(
                "capture",
                gateway.capture(&ctx.config.gateway, &gateway_ref, payment.amount),
            )
            .await?;

        let payment_id = payment.id.as_str();
        let (captured, update) = with_retry(&self.retry, "capture_payment", move || async move {
            let mut payment = ctx.handle.require::<Payment>(payment_id).await?;
            match payment.state {
                PaymentState::Captured | PaymentState::Refunded => return Ok((payment.value, None)),
                _ => payment.capture(Utc::now())?,
            }
            let mut order = ctx.handle.require::<Order>(&payment.order_id).await?;
            let transition = self.orders.record_capture(&mut order, payment.amount)?;
            let mut work = UnitOfWork::new();
            work.update(&payment)?;
            work.update(&order)?;
            ctx.handle.commit(work).await?;
            Ok((payment.value, Some((order.value, transition))))
        })
        .await?;

        if let Some((order, transition)) = update {
            info!(payment_id, capture_ref = %capture_ref, order_id = %order.id, order_state = %order.state, "Payment captured");
            self.orders.publish(ctx, &order, transition).await;
        }
        Ok(captured)
    }

    /// Refunds part or all of a captured payment. Admin only.
    ///
    /// The refund is recorded as pending before the gateway is called, so
    /// its amount is held against concurrent refunds. The idempotency key
    /// identifies the refund: replays return the settled refund, or re-drive
    /// one whose gateway outcome was never recorded.
    #[instrument(skip(self, ctx, request), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id, key = %request.idempotency_key))]
    pub async fn refund(
        &self,
        ctx: &RequestContext,
        payment_id: &str,
        request: RefundRequest,
    ) -> Result<Refund> {
        authorize(&ctx.identity, Role::Admin)?;
        let request = &request;
        let (payment, refund) = with_retry(&self.retry, "reserve_refund", move || {
            self.reserve_refund(ctx, payment_id, request)
        })
        .await?;
        if refund.state == RefundState::Settled {
            return Ok(refund);
        }
        let gateway_ref = payment.gateway_ref.clone().ok_or_else(|| {
            CommerceError::internal(format!("captured payment {payment_id} has no reference"))
        })?;

        let gateway = self.gateway(&payment.provider)?;
        let outcome = self
            .call_gateway(
                "refund",
                gateway.refund(&ctx.config.gateway, &gateway_ref, refund.amount, &refund.id),
            )
            .await;

        let key = refund.idempotency_key.as_str();
        match outcome {
            Ok(reference) => {
                let reference = reference.as_str();
                let (settled, update) = with_retry(&self.retry, "settle_refund", move || async move {
                    let mut payment = ctx.handle.require::<Payment>(payment_id).await?;
                    match payment.find_refund(key) {
                        Some(r) if r.state == RefundState::Settled => return Ok((r.clone(), None)),
                        Some(_) => {}
                        None => {
                            return Err(CommerceError::internal(format!(
                                "pending refund {key} of payment {payment_id} is gone"
                            )));
                        }
                    }
                    let settled = payment.settle_refund(key, reference.to_string(), Utc::now())?;
                    let mut order = ctx.handle.require::<Order>(&payment.order_id).await?;
                    let transition = self.orders.record_refund(&mut order, settled.amount)?;
                    let mut work = UnitOfWork::new();
                    work.update(&payment)?;
                    work.update(&order)?;
                    ctx.handle.commit(work).await?;
                    Ok((settled, Some((order.value, transition))))
                })
                .await?;

                if let Some((order, transition)) = update {
                    info!(payment_id, refund_id = %settled.id, amount = %settled.amount.value(), order_state = %order.state, "Payment refunded");
                    self.orders.publish(ctx, &order, transition).await;
                }
                Ok(settled)
            }
            Err(failure) if failure.class == FailureClass::Terminal => {
                with_retry(&self.retry, "release_refund", move || async move {
                    let mut payment = ctx.handle.require::<Payment>(payment_id).await?;
                    if !payment.release_refund(key) {
                        return Ok(());
                    }
                    let mut work = UnitOfWork::new();
                    work.update(&payment)?;
                    ctx.handle.commit(work).await
                })
                .await?;
                warn!(payment_id, reason = %failure.message, "Refund refused");
                Err(failure.into())
            }
            Err(failure) => {
                warn!(payment_id, reason = %failure.message, "Refund incomplete, retry with the same key");
                Err(failure.into())
            }
        }
    }

    async fn reserve_refund(
        &self,
        ctx: &RequestContext,
        payment_id: &str,
        request: &RefundRequest,
    ) -> Result<(Payment, Refund)> {
        let mut payment = ctx.handle.require::<Payment>(payment_id).await?;
        if let Some(existing) = payment.find_refund(&request.idempotency_key).cloned() {
            if existing.amount != request.amount {
                return Err(CommerceError::ValidationError(format!(
                    "idempotency key {} was used for a different amount",
                    request.idempotency_key
                )));
            }
            return Ok((payment.value, existing));
        }
        check_refundable(&payment, request.amount)?;
        let refund = payment.begin_refund(
            Uuid::new_v4().to_string(),
            request.idempotency_key.clone(),
            request.amount,
            Utc::now(),
        )?;
        let mut work = UnitOfWork::new();
        work.update(&payment)?;
        ctx.handle.commit(work).await?;
        Ok((payment.value, refund))
    }

    /// Releases an authorization that will not be captured. Admin only.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant(), request_id = %ctx.request_id))]
    pub async fn void(&self, ctx: &RequestContext, payment_id: &str) -> Result<Payment> {
        authorize(&ctx.identity, Role::Admin)?;
        let payment = with_retry(&self.retry, "void_payment", move || async move {
            let mut payment = ctx.handle.require::<Payment>(payment_id).await?;
            if payment.state == PaymentState::Voided {
                return Ok(payment.value);
            }
            payment.void(Utc::now())?;
            let mut order = ctx.handle.require::<Order>(&payment.order_id).await?;
            self.orders.release_reservation(&mut order, payment.amount);
            let mut work = UnitOfWork::new();
            work.update(&payment)?;
            work.update(&order)?;
            ctx.handle.commit(work).await?;
            Ok(payment.value)
        })
        .await?;
        info!(payment_id, "Payment voided");
        Ok(payment)
    }

    pub async fn view(&self, ctx: &RequestContext, payment_id: &str) -> Result<Payment> {
        authorize(&ctx.identity, Role::Admin)?;
        Ok(ctx.handle.require::<Payment>(payment_id).await?.value)
    }

    /// Every payment of the tenant, oldest first. Admin only.
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<Payment>> {
        authorize(&ctx.identity, Role::Admin)?;
        let mut payments: Vec<Payment> = ctx
            .handle
            .list::<Payment>()
            .await?
            .into_iter()
            .map(|p| p.value)
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    /// Payments of the orders a user owns. Guest orders are not included
    /// until claimed.
    pub async fn list_for_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<Vec<Payment>> {
        authorize_owner_or_admin(&ctx.identity, user_id)?;
        let owned: HashSet<String> = ctx
            .handle
            .list::<Order>()
            .await?
            .into_iter()
            .filter(|o| o.owner.as_ref() == Some(user_id))
            .map(|o| o.value.id)
            .collect();
        let mut payments: Vec<Payment> = ctx
            .handle
            .list::<Payment>()
            .await?
            .into_iter()
            .map(|p| p.value)
            .filter(|p| owned.contains(&p.order_id))
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    pub async fn list_for_order(&self, ctx: &RequestContext, order_id: &str) -> Result<Vec<Payment>> {
        let order = ctx.handle.require::<Order>(order_id).await?;
        authorize_order_access(&ctx.identity, order.owner.as_ref())?;
        Ok(self
            .orders
            .payments_for(ctx, order_id)
            .await?
            .into_iter()
            .map(|p| p.value)
            .collect())
    }
}

/// A fully refunded payment has nothing left, which is reported as an
/// excessive refund rather than a state error.
fn check_refundable(payment: &Payment, amount: Amount) -> Result<()> {
    match payment.state {
        PaymentState::Captured | PaymentState::Refunded => {
            let available = payment.refundable();
            if Money::from(amount) > available {
                return Err(CommerceError::ExcessiveRefund {
                    requested: amount.value(),
                    available: available.value(),
                });
            }
            Ok(())
        }
        state => Err(CommerceError::InvalidState(format!(
            "cannot refund payment {} in state {state}",
            payment.id
        ))),
    }
}
