use super::money::Money;
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DiscountRule {
    /// Percentage of the applicable subtotal, e.g. `10` for 10%.
    Percentage(Decimal),
    Fixed(Money),
}

impl DiscountRule {
    /// Discount for `base`, rounded to cents and never more than `base`.
    pub fn discount_for(&self, base: Money) -> Money {
        let raw = match self {
            DiscountRule::Percentage(percent) => base.scale(*percent / Decimal::ONE_HUNDRED),
            DiscountRule::Fixed(amount) => *amount,
        };
        raw.round().min(base)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub rule: DiscountRule,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
    /// SKUs the discount applies to. Empty means the whole order.
    #[serde(default)]
    pub skus: Vec<String>,
}

impl Coupon {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| now >= from)
            && self.valid_until.is_none_or(|until| now <= until)
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit
            .is_some_and(|limit| self.usage_count >= limit)
    }

    pub fn applies_to(&self, sku: &str) -> bool {
        self.skus.is_empty() || self.skus.iter().any(|s| s == sku)
    }

    /// Checks the validity window and usage limit.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if !self.is_valid_at(now) {
            return Err(CommerceError::CouponExpired(self.code.clone()));
        }
        if self.is_exhausted() {
            return Err(CommerceError::CouponExhausted(self.code.clone()));
        }
        Ok(())
    }

    /// Records one use. Fails without changing the count at the limit.
    pub fn consume(&mut self) -> Result<(), CommerceError> {
        if self.is_exhausted() {
            return Err(CommerceError::CouponExhausted(self.code.clone()));
        }
        self.usage_count += 1;
        Ok(())
    }

    pub fn snapshot(&self) -> AppliedCoupon {
        AppliedCoupon {
            code: self.code.clone(),
            rule: self.rule.clone(),
            skus: self.skus.clone(),
        }
    }
}

/// The coupon terms as they were when applied to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub rule: DiscountRule,
    pub skus: Vec<String>,
}
