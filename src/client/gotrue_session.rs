//! [`ClientIdentity`] over the HTTP identity-provider client, with the session persisted
//! in the device key-value store.

use super::{
    provider::{AuthEvent, ClientIdentity, ClientSession},
    store::{KeyValueStore, StoreError},
};
use crate::identity::{
    AssuranceLevel, Factor, GoTrueClient, IdentityProvider, ProviderError, SignedIn,
    TotpEnrollment,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

const SESSION_KEY: &str = "auth.session";
const EVENT_CAPACITY: usize = 16;

fn storage_error(err: StoreError) -> ProviderError {
    ProviderError::Unavailable(format!("session storage: {err}"))
}

pub struct ProviderSession {
    client: GoTrueClient,
    store: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<AuthEvent>,
}

impl ProviderSession {
    #[must_use]
    pub fn new(client: GoTrueClient, store: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            store,
            events,
        }
    }

    fn emit(&self, event: AuthEvent) {
        if self.events.send(event).is_err() {
            debug!("No auth event subscribers");
        }
    }

    async fn load(&self) -> Result<Option<ClientSession>, ProviderError> {
        let Some(raw) = self.store.get(SESSION_KEY).await.map_err(storage_error)? else {
            return Ok(None);
        };
        match serde_json::from_str::<SignedIn>(&raw) {
            Ok(signed_in) => Ok(Some(signed_in.into())),
            Err(err) => {
                warn!("Discarding unreadable stored session: {err}");
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &ClientSession) -> Result<(), ProviderError> {
        let stored = SignedIn {
            session: session.tokens.clone(),
            user: session.user.clone(),
        };
        let raw = serde_json::to_string(&stored)
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        self.store.set(SESSION_KEY, &raw).await.map_err(storage_error)
    }

    async fn forget(&self) -> Result<(), ProviderError> {
        self.store.remove(SESSION_KEY).await.map_err(storage_error)
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        self.load()
            .await?
            .map(|session| session.tokens.access_token)
            .ok_or(ProviderError::Unauthorized)
    }
}

#[async_trait]
impl ClientIdentity for ProviderSession {
    /// The stored session, confirmed live with the provider. An expired access token is
    /// refreshed once; a dead refresh token ends the session. While the provider is
    /// unreachable the stored session is returned as is.
    async fn current_session(&self) -> Result<Option<ClientSession>, ProviderError> {
        let Some(stored) = self.load().await? else {
            return Ok(None);
        };

        match self.client.get_user(&stored.tokens.access_token).await {
            Ok(user) => {
                let session = ClientSession {
                    tokens: stored.tokens,
                    user,
                };
                self.save(&session).await?;
                Ok(Some(session))
            }
            Err(ProviderError::Unauthorized) => {
                match self
                    .client
                    .refresh_session(&stored.tokens.refresh_token)
                    .await
                {
                    Ok(signed_in) => {
                        let session = ClientSession::from(signed_in);
                        self.save(&session).await?;
                        self.emit(AuthEvent::TokenRefreshed(session.clone()));
                        Ok(Some(session))
                    }
                    Err(ProviderError::Unauthorized) => {
                        info!("Stored session is no longer valid");
                        self.forget().await?;
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(ProviderError::Unavailable(reason)) => {
                warn!("Identity provider unreachable, using stored session: {reason}");
                Ok(Some(stored))
            }
            Err(err) => Err(err),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Revoke remotely when possible; the local session is always dropped.
    async fn sign_out(&self) -> Result<(), ProviderError> {
        if let Some(session) = self.load().await? {
            if let Err(err) = self.client.sign_out(&session.tokens.access_token).await {
                warn!("Failed to revoke session with the provider: {err}");
            }
        }
        self.forget().await?;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn assurance_level(&self) -> Result<AssuranceLevel, ProviderError> {
        let token = self.access_token().await?;
        self.client.assurance_level(&token).await
    }

    async fn list_factors(&self) -> Result<Vec<Factor>, ProviderError> {
        let token = self.access_token().await?;
        self.client.list_factors(&token).await
    }

    async fn enroll_totp(&self) -> Result<TotpEnrollment, ProviderError> {
        let token = self.access_token().await?;
        self.client.enroll_totp(&token).await
    }

    async fn challenge(&self, factor_id: &str) -> Result<String, ProviderError> {
        let token = self.access_token().await?;
        self.client.challenge_factor(&token, factor_id).await
    }

    async fn verify(
        &self,
        factor_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> Result<(), ProviderError> {
        let token = self.access_token().await?;
        let signed_in = self
            .client
            .verify_factor(&token, factor_id, challenge_id, code)
            .await?;
        let session = ClientSession::from(signed_in);
        self.save(&session).await?;
        self.emit(AuthEvent::StepUpVerified(session));
        Ok(())
    }

    async fn adopt_session(&self, signed_in: SignedIn) -> Result<(), ProviderError> {
        // Confirm the tokens are live before trusting the identity that came with them.
        let user = self.client.get_user(&signed_in.session.access_token).await?;
        let session = ClientSession {
            tokens: signed_in.session,
            user,
        };
        self.save(&session).await?;
        self.emit(AuthEvent::SignedIn(session));
        Ok(())
    }

    fn oauth_sign_in_url(&self, provider: &str, redirect_to: &str) -> Result<Url, ProviderError> {
        self.client.authorize_url(provider, redirect_to)
    }
}
