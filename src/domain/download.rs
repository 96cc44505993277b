use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Time and usage scoped access to one asset of a paid order.
///
/// Keyed by order and asset, so refreshing never creates a second grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadGrant {
    pub id: String,
    pub order_id: String,
    pub asset: String,
    pub expires_at: DateTime<Utc>,
    pub max_uses: Option<u32>,
    pub uses: u32,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl DownloadGrant {
    pub fn key(order_id: &str, asset: &str) -> String {
        format!("{order_id}:{asset}")
    }

    pub fn new(
        order_id: &str,
        asset: &str,
        expires_at: DateTime<Utc>,
        max_uses: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::key(order_id, asset),
            order_id: order_id.to_string(),
            asset: asset.to_string(),
            expires_at,
            max_uses,
            uses: 0,
            revoked: false,
            created_at: now,
        }
    }

    pub fn refresh(&mut self, expires_at: DateTime<Utc>) {
        self.expires_at = expires_at;
    }

    pub fn remaining_uses(&self) -> Option<u32> {
        self.max_uses.map(|max| max.saturating_sub(self.uses))
    }

    /// Counts one download, rejecting revoked, expired or used-up grants.
    pub fn redeem(&mut self, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.revoked {
            return Err(CommerceError::Forbidden(format!(
                "download {} has been revoked",
                self.id
            )));
        }
        if now > self.expires_at {
            return Err(CommerceError::DownloadExpired(self.id.clone()));
        }
        if self.remaining_uses() == Some(0) {
            return Err(CommerceError::DownloadExhausted(self.id.clone()));
        }
        self.uses += 1;
        Ok(())
    }
}

/// What a caller receives for a grant. Link signing happens outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadAccess {
    pub grant_id: String,
    pub asset: String,
    pub expires_at: DateTime<Utc>,
    pub remaining_uses: Option<u32>,
}

impl From<&DownloadGrant> for DownloadAccess {
    fn from(grant: &DownloadGrant) -> Self {
        Self {
            grant_id: grant.id.clone(),
            asset: grant.asset.clone(),
            expires_at: grant.expires_at,
            remaining_uses: grant.remaining_uses(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_redeem_limits() {
        let now = Utc::now();
        let mut grant = DownloadGrant::new("o-1", "ebook.pdf", now + Duration::hours(1), Some(1), now);
        assert_eq!(grant.id, "o-1:ebook.pdf");
        grant.redeem(now).unwrap();
        assert!(matches!(
            grant.redeem(now),
            Err(CommerceError::DownloadExhausted(_))
        ));
    }

    #[test]
    fn test_redeem_expired_and_revoked() {
        let now = Utc::now();
        let mut grant = DownloadGrant::new("o-1", "a", now - Duration::seconds(1), None, now);
        assert!(matches!(
            grant.redeem(now),
            Err(CommerceError::DownloadExpired(_))
        ));
        grant.refresh(now + Duration::hours(1));
        grant.redeem(now).unwrap();
        grant.revoked = true;
        assert!(matches!(grant.redeem(now), Err(CommerceError::Forbidden(_))));
    }
}
