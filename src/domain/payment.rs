use super::money::{Amount, Currency, Money};
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Initiated,
    Authorized,
    Captured,
    Refunded,
    Failed,
    Voided,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Initiated => "initiated",
            PaymentState::Authorized => "authorized",
            PaymentState::Captured => "captured",
            PaymentState::Refunded => "refunded",
            PaymentState::Failed => "failed",
            PaymentState::Voided => "voided",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundState {
    /// Recorded before the gateway call. Holds its amount against the payment.
    Pending,
    Settled,
}

/// A refund sub-transaction against a captured payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub idempotency_key: String,
    pub amount: Amount,
    pub state: RefundState,
    pub gateway_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub state: PaymentState,
    pub provider: String,
    pub idempotency_key: String,
    pub gateway_ref: Option<String>,
    pub refunds: Vec<Refund>,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(
        id: String,
        order_id: String,
        amount: Amount,
        currency: Currency,
        provider: String,
        idempotency_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id,
            amount,
            currency,
            state: PaymentState::Initiated,
            provider,
            idempotency_key,
            gateway_ref: None,
            refunds: Vec::new(),
            failure: None,
            created_at: now,
            authorized_at: None,
            captured_at: None,
            refunded_at: None,
            failed_at: None,
            voided_at: None,
        }
    }

    fn invalid(&self, action: &str) -> CommerceError {
        CommerceError::InvalidState(format!(
            "cannot {action} payment {} in state {}",
            self.id, self.state
        ))
    }

    /// Payments that still count against the order total.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self.state, PaymentState::Failed | PaymentState::Voided)
    }

    /// Settled refunds only.
    pub fn refunded_total(&self) -> Money {
        self.refunds
            .iter()
            .filter(|r| r.state == RefundState::Settled)
            .map(|r| Money::from(r.amount))
            .sum()
    }

    /// Captured amount neither refunded nor held by a pending refund.
    pub fn refundable(&self) -> Money {
        match self.state {
            PaymentState::Captured => {
                let held: Money = self.refunds.iter().map(|r| Money::from(r.amount)).sum();
                Money::from(self.amount) - held
            }
            _ => Money::ZERO,
        }
    }

    pub fn find_refund(&self, idempotency_key: &str) -> Option<&Refund> {
        self.refunds
            .iter()
            .find(|r| r.idempotency_key == idempotency_key)
    }

    pub fn authorize(&mut self, gateway_ref: String, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.state != PaymentState::Initiated {
            return Err(self.invalid("authorize"));
        }
        self.state = PaymentState::Authorized;
        self.gateway_ref = Some(gateway_ref);
        self.authorized_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.state != PaymentState::Initiated {
            return Err(self.invalid("fail"));
        }
        self.state = PaymentState::Failed;
        self.failure = Some(reason);
        self.failed_at = Some(now);
        Ok(())
    }

    pub fn capture(&mut self, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.state != PaymentState::Authorized {
            return Err(self.invalid("capture"));
        }
        self.state = PaymentState::Captured;
        self.captured_at = Some(now);
        Ok(())
    }

    pub fn void(&mut self, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.state != PaymentState::Authorized {
            return Err(self.invalid("void"));
        }
        self.state = PaymentState::Voided;
        self.voided_at = Some(now);
        Ok(())
    }

    /// Holds `amount` for a refund that is about to be sent to the gateway.
    pub fn begin_refund(
        &mut self,
        id: String,
        idempotency_key: String,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Refund, CommerceError> {
        if self.state != PaymentState::Captured {
            return Err(self.invalid("refund"));
        }
        let available = self.refundable();
        if Money::from(amount) > available {
            return Err(CommerceError::ExcessiveRefund {
                requested: amount.value(),
                available: available.value(),
            });
        }
        let refund = Refund {
            id,
            idempotency_key,
            amount,
            state: RefundState::Pending,
            gateway_ref: None,
            created_at: now,
            settled_at: None,
        };
        self.refunds.push(refund.clone());
        Ok(refund)
    }

    /// Marks a pending refund as done. The payment becomes `Refunded` once
    /// every refund is settled and nothing is left.
    pub fn settle_refund(
        &mut self,
        idempotency_key: &str,
        gateway_ref: String,
        now: DateTime<Utc>,
    ) -> Result<Refund, CommerceError> {
        let Some(index) = self
            .refunds
            .iter()
            .position(|r| r.idempotency_key == idempotency_key && r.state == RefundState::Pending)
        else {
            return Err(CommerceError::InvalidState(format!(
                "payment {} has no pending refund {idempotency_key}",
                self.id
            )));
        };
        let refund = &mut self.refunds[index];
        refund.state = RefundState::Settled;
        refund.gateway_ref = Some(gateway_ref);
        refund.settled_at = Some(now);
        let settled = refund.clone();

        let all_settled = self.refunds.iter().all(|r| r.state == RefundState::Settled);
        if all_settled && self.refundable().is_zero() {
            self.state = PaymentState::Refunded;
            self.refunded_at = Some(now);
        }
        Ok(settled)
    }

    /// Drops a pending refund the gateway refused. Returns whether one was dropped.
    pub fn release_refund(&mut self, idempotency_key: &str) -> bool {
        let before = self.refunds.len();
        self.refunds
            .retain(|r| !(r.idempotency_key == idempotency_key && r.state == RefundState::Pending));
        self.refunds.len() != before
    }
}
