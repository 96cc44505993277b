use super::money::Money;
use serde::{Deserialize, Serialize};

/// A sellable catalog entry. Line items snapshot `price` when added to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub price: Money,
    /// Downloadable asset references granted once an order is paid.
    #[serde(default)]
    pub downloads: Vec<String>,
}
