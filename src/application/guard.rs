//! Authentication and authorization predicates.
//!
//! Everything here is pure: callers evaluate these checks before reading
//! records for mutation, never after.

use crate::domain::identity::{Identity, Role, UserId};
use crate::domain::ports::CredentialDecoder;
use crate::domain::tenant::TenantId;
use crate::error::{CommerceError, Result};

/// Decodes a credential that must be present.
pub fn authenticate(
    decoder: &dyn CredentialDecoder,
    tenant: &TenantId,
    credential: Option<&str>,
) -> Result<Identity> {
    match credential {
        Some(credential) => decoder.decode(tenant, credential),
        None => Err(CommerceError::Unauthenticated(
            "missing credential".to_string(),
        )),
    }
}

/// Like `authenticate`, but a request without credential is anonymous.
pub fn identify(
    decoder: &dyn CredentialDecoder,
    tenant: &TenantId,
    credential: Option<&str>,
) -> Result<Identity> {
    match credential {
        Some(_) => authenticate(decoder, tenant, credential),
        None => Ok(Identity::anonymous()),
    }
}

pub fn authorize(identity: &Identity, required: Role) -> Result<()> {
    if identity.role >= required {
        Ok(())
    } else {
        Err(CommerceError::Forbidden(format!(
            "requires {required:?} role"
        )))
    }
}

pub fn authorize_owner_or_admin(identity: &Identity, owner: &UserId) -> Result<()> {
    if identity.is_admin() || identity.user_id.as_ref() == Some(owner) {
        Ok(())
    } else {
        Err(CommerceError::Forbidden(
            "only the owner or an admin may access this resource".to_string(),
        ))
    }
}

/// Guest orders (no owner) are reachable by whoever holds their id.
pub fn authorize_order_access(identity: &Identity, owner: Option<&UserId>) -> Result<()> {
    match owner {
        Some(owner) => authorize_owner_or_admin(identity, owner),
        None => Ok(()),
    }
}
