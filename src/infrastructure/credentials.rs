use crate::domain::identity::Identity;
use crate::domain::ports::CredentialDecoder;
use crate::domain::tenant::TenantId;
use crate::error::{CommerceError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct IssuedToken {
    identity: Identity,
    expires_at: Option<DateTime<Utc>>,
}

/// Resolves opaque bearer tokens from a fixed table.
///
/// Stands in for real token verification: the core only needs the
/// identity that comes out of it.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: HashMap<(TenantId, String), IssuedToken>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(
        &mut self,
        tenant: TenantId,
        token: impl Into<String>,
        identity: Identity,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.tokens.insert(
            (tenant, token.into()),
            IssuedToken {
                identity,
                expires_at,
            },
        );
    }
}

impl CredentialDecoder for StaticCredentials {
    fn decode(&self, tenant: &TenantId, credential: &str) -> Result<Identity> {
        let token = credential
            .strip_prefix("Bearer ")
            .or_else(|| credential.strip_prefix("bearer "))
            .unwrap_or(credential)
            .trim();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(CommerceError::Unauthenticated(
                "malformed credential".to_string(),
            ));
        }
        let issued = self
            .tokens
            .get(&(tenant.clone(), token.to_string()))
            .ok_or_else(|| CommerceError::Unauthenticated("unknown credential".to_string()))?;
        if issued.expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(CommerceError::Unauthenticated(
                "credential expired".to_string(),
            ));
        }
        Ok(issued.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_static_credentials() {
        let acme = TenantId::new("acme");
        let mut creds = StaticCredentials::new();
        creds.issue(acme.clone(), "tok-alice", Identity::user("alice"), None);
        creds.issue(
            acme.clone(),
            "tok-old",
            Identity::user("bob"),
            Some(Utc::now() - Duration::minutes(1)),
        );

        assert_eq!(
            creds.decode(&acme, "Bearer tok-alice").unwrap(),
            Identity::user("alice")
        );
        assert!(matches!(
            creds.decode(&acme, "tok-old"),
            Err(CommerceError::Unauthenticated(_))
        ));
        assert!(matches!(
            creds.decode(&acme, "Bearer "),
            Err(CommerceError::Unauthenticated(_))
        ));
        // Tokens are scoped to the tenant that issued them
        assert!(matches!(
            creds.decode(&TenantId::new("globex"), "tok-alice"),
            Err(CommerceError::Unauthenticated(_))
        ));
    }
}
