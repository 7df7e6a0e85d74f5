//! Identity-provider capability surface and the types that cross it.
//!
//! The provider owns credentials, sessions, MFA factors and the assurance level. The
//! server only needs four of its capabilities ([`IdentityProvider`]); the device side
//! consumes the session-bound ones through `client::provider::ClientIdentity`.
//!
//! Role claims arrive as loosely-typed profile metadata. They are resolved into the
//! closed [`Role`] enum exactly once, when a user payload is parsed at this boundary.

pub mod gotrue;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::warn;
use utoipa::ToSchema;

pub use gotrue::GoTrueClient;

/// Closed set of roles carried in an identity's profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Hr,
    Payroll,
    Security,
    Employee,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    /// Least-privileged role, used when the claim is absent or unknown.
    pub const DEFAULT: Self = Self::Employee;

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Hr => "hr",
            Self::Payroll => "payroll",
            Self::Security => "security",
            Self::Employee => "employee",
        }
    }

    /// Resolve an untrusted profile claim. Unknown values fall back to the default role.
    #[must_use]
    pub fn from_claim(claim: Option<&str>) -> Self {
        match claim {
            None => Self::DEFAULT,
            Some(value) => value.parse().unwrap_or_else(|UnknownRole(value)| {
                warn!("Unknown role claim {value:?}, using {}", Self::DEFAULT);
                Self::DEFAULT
            }),
        }
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "hr" => Ok(Self::Hr),
            "payroll" => Ok(Self::Payroll),
            "security" => Ok(Self::Security),
            "employee" => Ok(Self::Employee),
            _ => Err(UnknownRole(value.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticator assurance level reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AssuranceLevel {
    /// Single factor.
    Aal1,
    /// Second factor verified in this session.
    Aal2,
}

impl AssuranceLevel {
    #[must_use]
    pub const fn is_verified(self) -> bool {
        matches!(self, Self::Aal2)
    }
}

impl FromStr for AssuranceLevel {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "aal1" => Ok(Self::Aal1),
            "aal2" => Ok(Self::Aal2),
            other => Err(ProviderError::InvalidResponse(format!(
                "unknown assurance level: {other}"
            ))),
        }
    }
}

/// Public fields of an identity, as resolved at the trust boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Role,
}

/// Tokens the client needs to adopt a provider session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

/// Result of a successful password sign-in or step-up verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SignedIn {
    pub session: SessionTokens,
    pub user: Identity,
}

/// Account to be created through the provider's privileged API.
#[derive(Debug)]
pub struct NewAccount {
    pub email: String,
    pub password: SecretString,
    pub name: String,
    pub role: Role,
}

/// An enrolled second factor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    pub id: String,
    pub factor_type: String,
    pub status: String,
}

impl Factor {
    #[must_use]
    pub fn is_verified_totp(&self) -> bool {
        self.factor_type == "totp" && self.status == "verified"
    }
}

/// Material returned when a new TOTP factor is enrolled.
#[derive(Debug)]
pub struct TotpEnrollment {
    pub factor_id: String,
    pub qr_code: String,
    pub secret: SecretString,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Capabilities the server endpoints consume.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check credentials and issue a session.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, ProviderError>;

    /// Resolve an access token into a live identity.
    async fn get_user(&self, access_token: &str) -> Result<Identity, ProviderError>;

    /// User-scoped assurance level check using the caller's own token.
    async fn assurance_level(&self, access_token: &str) -> Result<AssuranceLevel, ProviderError>;

    /// Create a pre-confirmed account with the privileged key.
    async fn admin_create_account(&self, account: &NewAccount) -> Result<Identity, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_closed_set() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" HR ".parse::<Role>(), Ok(Role::Hr));
        assert_eq!("payroll".parse::<Role>(), Ok(Role::Payroll));
        assert_eq!("security".parse::<Role>(), Ok(Role::Security));
        assert_eq!("employee".parse::<Role>(), Ok(Role::Employee));
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn role_claim_defaults_to_least_privileged() {
        assert_eq!(Role::from_claim(None), Role::Employee);
        assert_eq!(Role::from_claim(Some("superuser")), Role::Employee);
        assert_eq!(Role::from_claim(Some("user")), Role::Employee);
        assert_eq!(Role::from_claim(Some("admin")), Role::Admin);
    }

    #[test]
    fn role_serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&Role::Security)?, "\"security\"");
        Ok(())
    }

    #[test]
    fn assurance_level_parses() {
        assert_eq!("aal2".parse::<AssuranceLevel>(), Ok(AssuranceLevel::Aal2));
        assert!(AssuranceLevel::Aal2.is_verified());
        assert!(!AssuranceLevel::Aal1.is_verified());
        assert!("aal3".parse::<AssuranceLevel>().is_err());
    }

    #[test]
    fn session_tokens_debug_is_redacted() {
        let tokens = SessionTokens {
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn session_tokens_use_camel_case() -> anyhow::Result<()> {
        let tokens = SessionTokens {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
        };
        let value = serde_json::to_value(&tokens)?;
        assert_eq!(value["accessToken"], "a");
        assert_eq!(value["refreshToken"], "r");
        Ok(())
    }
}
