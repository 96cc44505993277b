use super::context::RequestContext;
use super::guard::authorize;
use crate::domain::coupon::Coupon;
use crate::domain::identity::Role;
use crate::error::{CommerceError, Result};
use chrono::Utc;

/// Read access to a tenant's coupons.
pub struct CouponService;

impl CouponService {
    pub fn new() -> Self {
        Self
    }

    /// Every coupon, usable or not. Admin only.
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<Coupon>> {
        authorize(&ctx.identity, Role::Admin)?;
        let mut coupons: Vec<Coupon> = ctx
            .handle
            .list::<Coupon>()
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect();
        coupons.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(coupons)
    }

    /// Looks a coupon up before it is applied. Anyone may ask, but only
    /// admins see a coupon that could not be applied right now.
    pub async fn view(&self, ctx: &RequestContext, code: &str) -> Result<Coupon> {
        let coupon = ctx
            .handle
            .get::<Coupon>(code)
            .await?
            .ok_or_else(|| CommerceError::CouponNotFound(code.to_string()))?
            .value;
        if !ctx.identity.is_admin() {
            coupon.check(Utc::now())?;
        }
        Ok(coupon)
    }
}

impl Default for CouponService {
    fn default() -> Self {
        Self::new()
    }
}
