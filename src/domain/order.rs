use super::coupon::AppliedCoupon;
use super::identity::UserId;
use super::money::{Amount, Currency, Money};
use super::tenant::TenantId;
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Open,
    PendingPayment,
    Paid,
    PartiallyRefunded,
    Refunded,
    Cancelled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Open => "open",
            OrderState::PendingPayment => "pending_payment",
            OrderState::Paid => "paid",
            OrderState::PartiallyRefunded => "partially_refunded",
            OrderState::Refunded => "refunded",
            OrderState::Cancelled => "cancelled",
        }
    }

    /// States in which download entitlements may be issued.
    pub fn is_entitled(&self) -> bool {
        matches!(self, OrderState::Paid | OrderState::PartiallyRefunded)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
    /// Product price when the item was added.
    pub unit_price: Money,
}

impl LineItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.scale(self.quantity.into())
    }
}

/// The frozen price terms of an order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
}

impl PriceBreakdown {
    /// Builds a breakdown with `total = subtotal + tax + shipping - discount`.
    /// The discount is clamped to the subtotal so the total never goes negative.
    pub fn new(subtotal: Money, discount: Money, tax: Money, shipping: Money) -> Self {
        let discount = discount.min(subtotal);
        Self {
            subtotal,
            discount,
            tax,
            shipping,
            total: subtotal + tax + shipping - discount,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.discount <= self.subtotal
            && self.total.value()
                == self.subtotal.value() + self.tax.value() + self.shipping.value()
                    - self.discount.value()
    }
}

/// Result of an order state change, published to observers after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    Unchanged,
    Submitted,
    Paid,
    PartiallyRefunded,
    Refunded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub tenant: TenantId,
    pub owner: Option<UserId>,
    pub email: Option<String>,
    pub items: Vec<LineItem>,
    pub currency: Currency,
    pub breakdown: PriceBreakdown,
    pub coupon: Option<AppliedCoupon>,
    pub requested_coupon: Option<String>,
    pub state: OrderState,
    /// Sum of payment amounts that are initiated, authorized or captured.
    pub reserved: Money,
    pub captured: Money,
    pub refunded: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        tenant: TenantId,
        owner: Option<UserId>,
        email: Option<String>,
        currency: Currency,
        items: Vec<LineItem>,
        breakdown: PriceBreakdown,
        requested_coupon: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant,
            owner,
            email,
            items,
            currency,
            breakdown,
            coupon: None,
            requested_coupon,
            state: OrderState::Open,
            reserved: Money::ZERO,
            captured: Money::ZERO,
            refunded: Money::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total(&self) -> Money {
        self.breakdown.total
    }

    /// What is still owed before any new payment may be started.
    pub fn amount_owed(&self) -> Money {
        self.total() - self.reserved
    }

    fn invalid(&self, action: &str) -> CommerceError {
        CommerceError::InvalidState(format!(
            "cannot {action} order {} in state {}",
            self.id, self.state
        ))
    }

    /// Replaces line items and the preview breakdown of an open order.
    pub fn replace_items(
        &mut self,
        items: Vec<LineItem>,
        requested_coupon: Option<String>,
        breakdown: PriceBreakdown,
        now: DateTime<Utc>,
    ) -> Result<(), CommerceError> {
        if self.state != OrderState::Open {
            return Err(self.invalid("modify items of"));
        }
        self.items = items;
        self.requested_coupon = requested_coupon;
        self.breakdown = breakdown;
        self.updated_at = now;
        Ok(())
    }

    /// Freezes items and price. A zero total needs no payment and is paid at once.
    pub fn submit(
        &mut self,
        breakdown: PriceBreakdown,
        coupon: Option<AppliedCoupon>,
        now: DateTime<Utc>,
    ) -> Result<OrderTransition, CommerceError> {
        if self.state != OrderState::Open {
            return Err(self.invalid("submit"));
        }
        self.breakdown = breakdown;
        self.coupon = coupon;
        self.updated_at = now;
        if self.breakdown.total.is_zero() {
            self.state = OrderState::Paid;
            Ok(OrderTransition::Paid)
        } else {
            self.state = OrderState::PendingPayment;
            Ok(OrderTransition::Submitted)
        }
    }

    pub fn reserve(&mut self, amount: Amount, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.state != OrderState::PendingPayment {
            return Err(CommerceError::OrderNotPending(self.id.clone()));
        }
        let owed = self.amount_owed();
        if Money::from(amount) != owed {
            return Err(CommerceError::AmountMismatch {
                expected: owed.value(),
                actual: amount.value(),
            });
        }
        self.reserved += amount.into();
        self.updated_at = now;
        Ok(())
    }

    /// Returns a reservation after a failed or voided payment.
    pub fn release(&mut self, amount: Amount, now: DateTime<Utc>) {
        self.reserved -= amount.into();
        self.updated_at = now;
    }

    pub fn record_capture(
        &mut self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<OrderTransition, CommerceError> {
        if self.state != OrderState::PendingPayment {
            return Err(self.invalid("capture payment for"));
        }
        let captured = self.captured + amount.into();
        if captured > self.total() {
            return Err(CommerceError::AmountMismatch {
                expected: self.total().value(),
                actual: captured.value(),
            });
        }
        self.captured = captured;
        self.updated_at = now;
        if self.captured >= self.total() {
            self.state = OrderState::Paid;
            Ok(OrderTransition::Paid)
        } else {
            Ok(OrderTransition::Unchanged)
        }
    }

    pub fn record_refund(
        &mut self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<OrderTransition, CommerceError> {
        if !matches!(
            self.state,
            OrderState::Paid | OrderState::PartiallyRefunded
        ) {
            return Err(self.invalid("refund"));
        }
        let available = self.captured - self.refunded;
        if Money::from(amount) > available {
            return Err(CommerceError::ExcessiveRefund {
                requested: amount.value(),
                available: available.value(),
            });
        }
        self.refunded += amount.into();
        self.updated_at = now;
        if self.refunded >= self.captured {
            self.state = OrderState::Refunded;
            Ok(OrderTransition::Refunded)
        } else {
            self.state = OrderState::PartiallyRefunded;
            Ok(OrderTransition::PartiallyRefunded)
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<OrderTransition, CommerceError> {
        if !matches!(self.state, OrderState::Open | OrderState::PendingPayment)
            || !self.captured.is_zero()
        {
            return Err(self.invalid("cancel"));
        }
        self.state = OrderState::Cancelled;
        self.reserved = Money::ZERO;
        self.updated_at = now;
        Ok(OrderTransition::Cancelled)
    }
}
