use super::handle::{TenantHandle, Versioned};
use crate::domain::coupon::Coupon;
use crate::domain::money::Money;
use crate::domain::order::{LineItem, PriceBreakdown};
use crate::domain::ports::RateProvider;
use crate::domain::product::Product;
use crate::domain::tenant::TenantConfig;
use crate::error::{CommerceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A cart entry as requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub sku: String,
    pub quantity: u32,
}

impl ItemRequest {
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// A price breakdown plus the coupon record it was computed with, so the
/// caller can consume the coupon in the same unit of work.
#[derive(Debug, Clone)]
pub struct Pricing {
    pub breakdown: PriceBreakdown,
    pub coupon: Option<Versioned<Coupon>>,
}

/// Computes order totals from line items, a coupon and tenant rates.
#[derive(Clone)]
pub struct PricingEngine {
    rates: Arc<dyn RateProvider>,
}

impl PricingEngine {
    pub fn new(rates: Arc<dyn RateProvider>) -> Self {
        Self { rates }
    }

    /// Validates requested items and snapshots current product prices.
    pub async fn line_items(
        &self,
        handle: &TenantHandle,
        requests: &[ItemRequest],
    ) -> Result<Vec<LineItem>> {
        let mut items = Vec::with_capacity(requests.len());
        for request in requests {
            check_quantity(&request.sku, request.quantity)?;
            let product = handle
                .get::<Product>(&request.sku)
                .await?
                .ok_or_else(|| CommerceError::ProductNotFound(request.sku.clone()))?;
            items.push(LineItem {
                sku: product.sku.clone(),
                quantity: request.quantity,
                unit_price: product.price,
            });
        }
        Ok(items)
    }

    /// Prices `items` with an optional coupon.
    ///
    /// The coupon is checked against its window and usage limit but not
    /// consumed; tax applies to the subtotal before discount.
    pub async fn price(
        &self,
        handle: &TenantHandle,
        config: &TenantConfig,
        items: &[LineItem],
        coupon_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Pricing> {
        for item in items {
            check_quantity(&item.sku, item.quantity)?;
        }
        let subtotal: Money = items.iter().map(LineItem::line_total).sum();

        let coupon = match coupon_code {
            Some(code) => Some(
                handle
                    .get::<Coupon>(code)
                    .await?
                    .ok_or_else(|| CommerceError::CouponNotFound(code.to_string()))?,
            ),
            None => None,
        };

        let discount = match &coupon {
            Some(coupon) => {
                coupon.check(now)?;
                let applicable: Money = items
                    .iter()
                    .filter(|item| coupon.applies_to(&item.sku))
                    .map(LineItem::line_total)
                    .sum();
                if !coupon.skus.is_empty() && applicable.is_zero() {
                    return Err(CommerceError::CouponNotApplicable(coupon.code.clone()));
                }
                coupon.rule.discount_for(applicable)
            }
            None => Money::ZERO,
        };

        let tax = self.rates.tax(config, items, subtotal).await?;
        let shipping = self.rates.shipping(config, items).await?;

        Ok(Pricing {
            breakdown: PriceBreakdown::new(subtotal, discount, tax, shipping),
            coupon,
        })
    }

    /// Same breakdown as `price`, for previews of open orders.
    pub async fn quote(
        &self,
        handle: &TenantHandle,
        config: &TenantConfig,
        items: &[LineItem],
        coupon_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PriceBreakdown> {
        Ok(self
            .price(handle, config, items, coupon_code, now)
            .await?
            .breakdown)
    }
}

fn check_quantity(sku: &str, quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(CommerceError::InvalidQuantity {
            sku: sku.to_string(),
            quantity,
        });
    }
    Ok(())
}
