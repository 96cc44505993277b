use crate::domain::order::Order;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct OrderRow<'a> {
    tenant: &'a str,
    order: &'a str,
    state: &'static str,
    currency: &'a str,
    subtotal: String,
    discount: String,
    tax: String,
    shipping: String,
    total: String,
    captured: String,
    refunded: String,
}

impl<'a> From<&'a Order> for OrderRow<'a> {
    fn from(order: &'a Order) -> Self {
        let b = &order.breakdown;
        Self {
            tenant: order.tenant.as_str(),
            order: &order.id,
            state: order.state.as_str(),
            currency: order.currency.code(),
            subtotal: b.subtotal.to_string(),
            discount: b.discount.to_string(),
            tax: b.tax.to_string(),
            shipping: b.shipping.to_string(),
            total: b.total.to_string(),
            captured: order.captured.to_string(),
            refunded: order.refunded.to_string(),
        }
    }
}

/// Writes the final state of orders as CSV.
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per order and flushes. The header is written even when
    /// there are no orders.
    pub fn write_orders<'a, I>(&mut self, orders: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Order>,
    {
        let mut wrote_any = false;
        for order in orders {
            self.writer.serialize(OrderRow::from(order))?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record([
                "tenant", "order", "state", "currency", "subtotal", "discount", "tax",
                "shipping", "total", "captured", "refunded",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
