use super::context::RequestContext;
use super::guard::{authorize, authorize_owner_or_admin};
use super::handle::UnitOfWork;
use super::retry::{RetryPolicy, with_retry};
use crate::domain::identity::{Address, Role, User, UserId};
use crate::domain::order::Order;
use crate::error::{CommerceError, Result};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// User records and the guest-order claim.
pub struct UserService {
    retry: RetryPolicy,
}

impl UserService {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Admin only.
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<User>> {
        authorize(&ctx.identity, Role::Admin)?;
        let mut users: Vec<User> = ctx
            .handle
            .list::<User>()
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect();
        users.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(users)
    }

    pub async fn view_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<User> {
        authorize_owner_or_admin(&ctx.identity, user_id)?;
        Ok(ctx.handle.require::<User>(user_id.as_str()).await?.value)
    }

    pub async fn list_addresses(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
    ) -> Result<Vec<Address>> {
        Ok(self.view_user(ctx, user_id).await?.addresses)
    }

    /// Admin only. A blank address id is replaced by a generated one.
    pub async fn add_address(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        address: Address,
    ) -> Result<Address> {
        authorize(&ctx.identity, Role::Admin)?;
        let mut address = address;
        if address.id.trim().is_empty() {
            address.id = Uuid::new_v4().to_string();
        }
        let address = &address;
        with_retry(&self.retry, "add_address", move || async move {
            let mut user = ctx.handle.require::<User>(user_id.as_str()).await?;
            if user.addresses.iter().any(|a| a.id == address.id) {
                return Err(CommerceError::ValidationError(format!(
                    "address {} already exists",
                    address.id
                )));
            }
            user.addresses.push(address.clone());
            let mut work = UnitOfWork::new();
            work.update(&user)?;
            ctx.handle.commit(work).await
        })
        .await?;
        Ok(address.clone())
    }

    /// Admin only.
    pub async fn delete_address(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        address_id: &str,
    ) -> Result<()> {
        authorize(&ctx.identity, Role::Admin)?;
        with_retry(&self.retry, "delete_address", move || async move {
            let mut user = ctx.handle.require::<User>(user_id.as_str()).await?;
            let before = user.addresses.len();
            user.addresses.retain(|a| a.id != address_id);
            if user.addresses.len() == before {
                return Err(CommerceError::NotFound(format!("Address {address_id}")));
            }
            let mut work = UnitOfWork::new();
            work.update(&user)?;
            ctx.handle.commit(work).await
        })
        .await
    }

    /// Moves guest orders placed with the caller's email into the caller's
    /// account, all in one commit.
    pub async fn claim_orders(&self, ctx: &RequestContext) -> Result<Vec<Order>> {
        authorize(&ctx.identity, Role::User)?;
        let user_id = ctx
            .identity
            .user_id
            .as_ref()
            .ok_or_else(|| CommerceError::Unauthenticated("no user in credential".to_string()))?;
        let user = ctx.handle.require::<User>(user_id.as_str()).await?;
        let email = user.email.as_str();

        let claimed = with_retry(&self.retry, "claim_orders", move || async move {
            let now = Utc::now();
            let mut work = UnitOfWork::new();
            let mut claimed = Vec::new();
            for mut order in ctx.handle.list::<Order>().await? {
                let matches = order
                    .email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email));
                if order.owner.is_none() && matches {
                    order.owner = Some(user_id.clone());
                    order.updated_at = now;
                    work.update(&order)?;
                    claimed.push(order.value);
                }
            }
            ctx.handle.commit(work).await?;
            Ok(claimed)
        })
        .await?;

        info!(user_id = %user_id, claimed = claimed.len(), "Guest orders claimed");
        Ok(claimed)
    }
}
