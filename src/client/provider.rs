//! Session-bound identity-provider capabilities consumed by the device side.
//!
//! Unlike [`crate::identity::IdentityProvider`], every call here acts on "the current
//! session" the implementation holds, and state changes are announced on a broadcast
//! channel of [`AuthEvent`]s.

use crate::identity::{
    AssuranceLevel, Factor, Identity, ProviderError, SessionTokens, SignedIn, TotpEnrollment,
};
use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

/// Provider session as seen by the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSession {
    pub tokens: SessionTokens,
    pub user: Identity,
}

impl From<SignedIn> for ClientSession {
    fn from(signed_in: SignedIn) -> Self {
        Self {
            tokens: signed_in.session,
            user: signed_in.user,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    /// A new sign-in. Opens a fresh session window.
    SignedIn(ClientSession),
    SignedOut,
    /// Same sign-in, new tokens. Never extends the session window.
    TokenRefreshed(ClientSession),
    /// A step-up challenge was answered; the session now carries `aal2`.
    StepUpVerified(ClientSession),
}

impl AuthEvent {
    #[must_use]
    pub fn session(&self) -> Option<&ClientSession> {
        match self {
            Self::SignedIn(session) | Self::TokenRefreshed(session) | Self::StepUpVerified(session) => {
                Some(session)
            }
            Self::SignedOut => None,
        }
    }
}

#[async_trait]
pub trait ClientIdentity: Send + Sync {
    /// The current session, if any.
    async fn current_session(&self) -> Result<Option<ClientSession>, ProviderError>;

    /// Subscribe to auth-state changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Assurance level of the current session.
    async fn assurance_level(&self) -> Result<AssuranceLevel, ProviderError>;

    async fn list_factors(&self) -> Result<Vec<Factor>, ProviderError>;

    async fn enroll_totp(&self) -> Result<TotpEnrollment, ProviderError>;

    /// Issue a challenge for `factor_id`, returning the challenge id.
    async fn challenge(&self, factor_id: &str) -> Result<String, ProviderError>;

    /// Answer a challenge. Emits [`AuthEvent::StepUpVerified`] on success.
    async fn verify(
        &self,
        factor_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> Result<(), ProviderError>;

    /// Install a session issued elsewhere (e.g. by `POST /login`). Emits
    /// [`AuthEvent::SignedIn`].
    async fn adopt_session(&self, signed_in: SignedIn) -> Result<(), ProviderError>;

    /// URL that starts an OAuth sign-in with `provider`.
    fn oauth_sign_in_url(&self, provider: &str, redirect_to: &str) -> Result<Url, ProviderError>;
}
