//! Provider and audit doubles for handler tests.

use crate::audit::{AuditError, AuditFilter, AuditRecord, AuditStore, NewAuditEvent};
use crate::identity::{
    AssuranceLevel, Identity, IdentityProvider, NewAccount, ProviderError, Role, SessionTokens,
    SignedIn,
};
use super::state::{AuthConfig, AuthState};
use crate::clock::ManualClock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) const TEST_NOW_MS: i64 = 1_700_000_000_000;

pub(crate) fn auth_state(
    provider: Arc<FakeProvider>,
    audit: Arc<dyn AuditStore>,
) -> Arc<AuthState> {
    let now = DateTime::from_timestamp_millis(TEST_NOW_MS).unwrap_or_default();
    Arc::new(AuthState::new(
        AuthConfig::default(),
        provider,
        audit,
        Arc::new(ManualClock::new(now)),
    ))
}

#[derive(Default)]
struct ProviderState {
    tokens: HashMap<String, (Identity, Result<AssuranceLevel, ProviderError>)>,
    passwords: HashMap<String, (String, Identity)>,
    sign_in_calls: usize,
    created: Vec<(String, String, Role)>,
    create_error: Option<ProviderError>,
}

#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn add_token(&self, token: &str, id: &str, role: Role, aal: AssuranceLevel) {
        self.add_token_with(token, id, role, Ok(aal));
    }

    pub(crate) fn add_token_with(
        &self,
        token: &str,
        id: &str,
        role: Role,
        aal: Result<AssuranceLevel, ProviderError>,
    ) {
        let identity = Identity {
            id: id.to_string(),
            email: Some(format!("{id}@example.com")),
            name: None,
            role,
        };
        self.lock().tokens.insert(token.to_string(), (identity, aal));
    }

    pub(crate) fn add_user(&self, email: &str, password: &str, role: Role) {
        let identity = Identity {
            id: format!("id-{email}"),
            email: Some(email.to_string()),
            name: None,
            role,
        };
        self.lock()
            .passwords
            .insert(email.to_string(), (password.to_string(), identity));
    }

    pub(crate) fn fail_create(&self, err: ProviderError) {
        self.lock().create_error = Some(err);
    }

    pub(crate) fn sign_in_calls(&self) -> usize {
        self.lock().sign_in_calls
    }

    pub(crate) fn created(&self) -> Vec<(String, String, Role)> {
        self.lock().created.clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, ProviderError> {
        let mut state = self.lock();
        state.sign_in_calls += 1;
        match state.passwords.get(email) {
            Some((expected, identity)) if expected == password => Ok(SignedIn {
                session: SessionTokens {
                    access_token: format!("access-{}", identity.id),
                    refresh_token: format!("refresh-{}", identity.id),
                },
                user: identity.clone(),
            }),
            _ => Err(ProviderError::InvalidCredentials),
        }
    }

    async fn get_user(&self, access_token: &str) -> Result<Identity, ProviderError> {
        self.lock()
            .tokens
            .get(access_token)
            .map(|(identity, _)| identity.clone())
            .ok_or(ProviderError::Unauthorized)
    }

    async fn assurance_level(&self, access_token: &str) -> Result<AssuranceLevel, ProviderError> {
        self.lock()
            .tokens
            .get(access_token)
            .map(|(_, aal)| aal.clone())
            .unwrap_or(Err(ProviderError::Unauthorized))
    }

    async fn admin_create_account(&self, account: &NewAccount) -> Result<Identity, ProviderError> {
        let mut state = self.lock();
        if let Some(err) = state.create_error.clone() {
            return Err(err);
        }
        state.created.push((
            account.email.clone(),
            account.password.expose_secret().to_string(),
            account.role,
        ));
        Ok(Identity {
            id: format!("new-{}", state.created.len()),
            email: Some(account.email.clone()),
            name: Some(account.name.clone()),
            role: account.role,
        })
    }
}

/// Audit store whose every operation fails.
pub(crate) struct BrokenAuditStore;

#[async_trait]
impl AuditStore for BrokenAuditStore {
    async fn record(&self, _event: NewAuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("down".to_string()))
    }

    async fn count_login_failures(
        &self,
        _email: &str,
        _since: DateTime<Utc>,
    ) -> Result<i64, AuditError> {
        Err(AuditError::Unavailable("down".to_string()))
    }

    async fn list(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        Err(AuditError::Unavailable("down".to_string()))
    }

    async fn ping(&self) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("down".to_string()))
    }

    fn backend(&self) -> &'static str {
        "broken"
    }
}

/// Reads succeed with zero failures, writes fail.
pub(crate) struct ReadOnlyAuditStore;

#[async_trait]
impl AuditStore for ReadOnlyAuditStore {
    async fn record(&self, _event: NewAuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("read-only".to_string()))
    }

    async fn count_login_failures(
        &self,
        _email: &str,
        _since: DateTime<Utc>,
    ) -> Result<i64, AuditError> {
        Ok(0)
    }

    async fn list(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(Vec::new())
    }

    async fn ping(&self) -> Result<(), AuditError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "read-only"
    }
}
