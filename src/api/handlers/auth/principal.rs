//! Authenticated principal extraction and authorization helpers.
//!
//! Flow Overview: read the bearer token, resolve it to a live identity with the provider,
//! and return a principal that downstream handlers can use. The role is whatever the
//! provider reports now, never a value cached in the token.

use super::{error::ApiError, utils::extract_bearer_token};
use crate::identity::{Identity, IdentityProvider, ProviderError, Role};
use axum::http::HeaderMap;
use tracing::error;

/// Identity behind the request's bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub identity: Identity,
    pub access_token: String,
}

impl Principal {
    #[must_use]
    pub fn has_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.identity.role)
    }
}

/// Resolve the bearer token into a principal, or 401 when absent or dead.
///
/// # Errors
/// `Unauthenticated` when the token is missing or not live, `Unavailable` when the
/// provider cannot be reached.
pub async fn require_auth(
    headers: &HeaderMap,
    provider: &dyn IdentityProvider,
) -> Result<Principal, ApiError> {
    let Some(access_token) = extract_bearer_token(headers) else {
        return Err(ApiError::Unauthenticated("Missing bearer token".to_string()));
    };

    match provider.get_user(&access_token).await {
        Ok(identity) => Ok(Principal {
            identity,
            access_token,
        }),
        Err(ProviderError::Unavailable(reason)) => {
            error!("Identity provider unavailable: {reason}");
            Err(ApiError::Unavailable(
                "Identity provider unavailable".to_string(),
            ))
        }
        Err(err) => {
            error!("Failed to resolve bearer token: {err}");
            Err(ApiError::Unauthenticated("Unauthorized".to_string()))
        }
    }
}

/// # Errors
/// `Forbidden` when the principal's role is not in `allowed`.
pub fn require_role(principal: &Principal, allowed: &[Role]) -> Result<(), ApiError> {
    if principal.has_role(allowed) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Forbidden".to_string()))
    }
}
