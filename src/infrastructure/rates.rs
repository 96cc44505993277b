use crate::domain::money::Money;
use crate::domain::order::LineItem;
use crate::domain::ports::RateProvider;
use crate::domain::tenant::TenantConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Tax and shipping taken straight from the tenant configuration.
///
/// Tax is `rate × subtotal`, rounded to cents; shipping is a flat fee per
/// order with at least one item.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredRates;

#[async_trait]
impl RateProvider for ConfiguredRates {
    async fn tax(
        &self,
        config: &TenantConfig,
        _items: &[LineItem],
        subtotal: Money,
    ) -> Result<Money> {
        Ok(subtotal.scale(config.tax.rate).round())
    }

    async fn shipping(&self, config: &TenantConfig, items: &[LineItem]) -> Result<Money> {
        if items.is_empty() {
            Ok(Money::ZERO)
        } else {
            Ok(config.shipping.flat)
        }
    }
}
