use super::csv::journal_reader::{JournalEntry, JournalOp};
use crate::application::Commerce;
use crate::application::context::{RequestContext, RequestEnvelope};
use crate::application::orders::{NewOrder, OrderUpdate};
use crate::application::payments::{PaymentRequest, RefundRequest};
use crate::application::pricing::ItemRequest;
use crate::domain::money::Amount;
use crate::domain::order::Order;
use crate::error::{CommerceError, Result};
use std::collections::HashMap;
use tracing::debug;

type Alias = (String, String);

/// Where an order created by the journal lives and who created it.
#[derive(Debug, Clone)]
struct OrderRef {
    id: String,
    tenant: String,
    credential: Option<String>,
}

/// Replays journal entries against the commerce core.
///
/// Journal aliases are scoped per tenant. `add_item` rows collect a cart
/// under an order alias; the following `create` or `update_items` row for
/// that alias consumes it.
pub struct JournalRunner {
    commerce: Commerce,
    carts: HashMap<Alias, Vec<ItemRequest>>,
    orders: HashMap<Alias, OrderRef>,
    payments: HashMap<Alias, String>,
    created: Vec<Alias>,
}

impl JournalRunner {
    pub fn new(commerce: Commerce) -> Self {
        Self {
            commerce,
            carts: HashMap::new(),
            orders: HashMap::new(),
            payments: HashMap::new(),
            created: Vec::new(),
        }
    }

    /// Applies one entry. Errors leave the runner usable for the next row.
    pub async fn apply(&mut self, entry: JournalEntry) -> Result<()> {
        let mut envelope = RequestEnvelope::new(entry.tenant.clone());
        envelope.credential = entry.credential.clone();

        if entry.op == JournalOp::AddItem {
            let alias = self.alias(&entry, entry.order.as_deref(), "order")?;
            let item = item_of(&entry).ok_or_else(|| missing("sku"))?;
            self.carts.entry(alias).or_default().push(item);
            return Ok(());
        }

        let ctx = self.commerce.begin(&envelope).await?;
        debug!(op = ?entry.op, tenant = %entry.tenant, request_id = %ctx.request_id, "Applying journal entry");
        match entry.op {
            JournalOp::AddItem => Ok(()),
            JournalOp::Create => self.create(&ctx, &entry).await,
            JournalOp::Submit => {
                let order_id = self.order_id(&entry)?;
                self.commerce.orders().submit(&ctx, &order_id).await.map(drop)
            }
            JournalOp::UpdateItems => {
                let order_id = self.order_id(&entry)?;
                let alias = self.alias(&entry, entry.order.as_deref(), "order")?;
                let mut items = self.carts.remove(&alias).unwrap_or_default();
                items.extend(item_of(&entry));
                let update = OrderUpdate {
                    items: (!items.is_empty()).then_some(items),
                    coupon: entry.coupon.clone().map(Some),
                    email: None,
                };
                self.commerce
                    .orders()
                    .update(&ctx, &order_id, update)
                    .await
                    .map(drop)
            }
            JournalOp::Preauthorize => {
                let order_id = self.order_id(&entry)?;
                let alias = self.alias(&entry, entry.payment.as_deref(), "payment")?;
                let request = PaymentRequest {
                    amount: amount_of(&entry)?,
                    currency: None,
                    provider: None,
                    idempotency_key: entry.key.clone().ok_or_else(|| missing("key"))?,
                };
                let payment = self
                    .commerce
                    .payments()
                    .preauthorize(&ctx, &order_id, request)
                    .await?;
                self.payments.insert(alias, payment.id);
                Ok(())
            }
            JournalOp::Confirm => {
                let payment_id = self.payment_id(&entry)?;
                self.commerce
                    .payments()
                    .confirm(&ctx, &payment_id)
                    .await
                    .map(drop)
            }
            JournalOp::Refund => {
                let payment_id = self.payment_id(&entry)?;
                let request = RefundRequest {
                    amount: amount_of(&entry)?,
                    idempotency_key: entry.key.clone().ok_or_else(|| missing("key"))?,
                };
                self.commerce
                    .payments()
                    .refund(&ctx, &payment_id, request)
                    .await
                    .map(drop)
            }
            JournalOp::Void => {
                let payment_id = self.payment_id(&entry)?;
                self.commerce.payments().void(&ctx, &payment_id).await.map(drop)
            }
            JournalOp::Cancel => {
                let order_id = self.order_id(&entry)?;
                self.commerce.orders().cancel(&ctx, &order_id).await.map(drop)
            }
            JournalOp::Downloads => {
                let order_id = self.order_id(&entry)?;
                self.commerce
                    .downloads()
                    .issue_or_refresh(&ctx, &order_id)
                    .await
                    .map(drop)
            }
        }
    }

    async fn create(&mut self, ctx: &RequestContext, entry: &JournalEntry) -> Result<()> {
        let alias = self.alias(entry, entry.order.as_deref(), "order")?;
        if self.orders.contains_key(&alias) {
            return Err(CommerceError::ValidationError(format!(
                "order alias {} already used",
                alias.1
            )));
        }
        let mut items = self.carts.remove(&alias).unwrap_or_default();
        items.extend(item_of(entry));

        let order = self
            .commerce
            .orders()
            .create(
                ctx,
                NewOrder {
                    items,
                    coupon: entry.coupon.clone(),
                    email: None,
                },
            )
            .await?;
        self.orders.insert(
            alias.clone(),
            OrderRef {
                id: order.id,
                tenant: entry.tenant.clone(),
                credential: entry.credential.clone(),
            },
        );
        self.created.push(alias);
        Ok(())
    }

    /// Final state of every order the journal created, in creation order,
    /// read with the credential that created it.
    pub async fn orders(&self) -> Result<Vec<Order>> {
        let mut orders = Vec::with_capacity(self.created.len());
        for alias in &self.created {
            let Some(order_ref) = self.orders.get(alias) else {
                continue;
            };
            let mut envelope = RequestEnvelope::new(order_ref.tenant.clone());
            envelope.credential = order_ref.credential.clone();
            let ctx = self.commerce.begin(&envelope).await?;
            orders.push(self.commerce.orders().view(&ctx, &order_ref.id).await?);
        }
        Ok(orders)
    }

    fn alias(&self, entry: &JournalEntry, name: Option<&str>, what: &str) -> Result<Alias> {
        let name = name.ok_or_else(|| missing(what))?;
        Ok((entry.tenant.clone(), name.to_string()))
    }

    fn order_id(&self, entry: &JournalEntry) -> Result<String> {
        let alias = self.alias(entry, entry.order.as_deref(), "order")?;
        self.orders
            .get(&alias)
            .map(|o| o.id.clone())
            .ok_or_else(|| CommerceError::ValidationError(format!("unknown order alias {}", alias.1)))
    }

    fn payment_id(&self, entry: &JournalEntry) -> Result<String> {
        let alias = self.alias(entry, entry.payment.as_deref(), "payment")?;
        self.payments
            .get(&alias)
            .cloned()
            .ok_or_else(|| {
                CommerceError::ValidationError(format!("unknown payment alias {}", alias.1))
            })
    }
}

fn missing(column: &str) -> CommerceError {
    CommerceError::ValidationError(format!("missing {column} column"))
}

/// Quantity defaults to one when only a SKU is given.
fn item_of(entry: &JournalEntry) -> Option<ItemRequest> {
    entry
        .sku
        .as_ref()
        .map(|sku| ItemRequest::new(sku.clone(), entry.quantity.unwrap_or(1)))
}

fn amount_of(entry: &JournalEntry) -> Result<Amount> {
    Amount::new(entry.amount.ok_or_else(|| missing("amount"))?)
}
