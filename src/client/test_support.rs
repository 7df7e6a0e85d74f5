//! In-memory provider double for client-side tests.

use super::provider::{AuthEvent, ClientIdentity, ClientSession};
use crate::identity::{
    AssuranceLevel, Factor, Identity, ProviderError, Role, SessionTokens, SignedIn,
    TotpEnrollment,
};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::{Semaphore, broadcast};
use url::Url;

struct FakeState {
    session: Option<ClientSession>,
    assurance: Result<AssuranceLevel, ProviderError>,
    assurance_gate: Option<Arc<Semaphore>>,
    factors: Vec<Factor>,
    verified_factor: Option<String>,
    reject_codes: bool,
    fail_sign_out: bool,
    sign_out_calls: usize,
    adopted: usize,
}

pub(crate) struct FakeIdentity {
    state: Mutex<FakeState>,
    events: broadcast::Sender<AuthEvent>,
    assurance_waiting: AtomicBool,
}

pub(crate) fn client_session(id: &str, role: Role) -> ClientSession {
    ClientSession {
        tokens: SessionTokens {
            access_token: format!("access-{id}"),
            refresh_token: format!("refresh-{id}"),
        },
        user: Identity {
            id: id.to_string(),
            email: Some(format!("{id}@example.com")),
            name: None,
            role,
        },
    }
}

impl FakeIdentity {
    fn with_session(session: Option<ClientSession>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(FakeState {
                session,
                assurance: Ok(AssuranceLevel::Aal1),
                assurance_gate: None,
                factors: Vec::new(),
                verified_factor: None,
                reject_codes: false,
                fail_sign_out: false,
                sign_out_calls: 0,
                adopted: 0,
            }),
            events,
            assurance_waiting: AtomicBool::new(false),
        }
    }

    pub(crate) fn signed_in(id: &str, role: Role) -> Self {
        Self::with_session(Some(client_session(id, role)))
    }

    pub(crate) fn signed_out() -> Self {
        Self::with_session(None)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: AuthEvent) {
        // No subscriber is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn session(&self) -> Option<ClientSession> {
        self.lock().session.clone()
    }

    /// Install a session without announcing it.
    pub(crate) fn sign_in_as(&self, id: &str, role: Role) -> ClientSession {
        let session = client_session(id, role);
        self.lock().session = Some(session.clone());
        session
    }

    /// Install a session and announce it.
    pub(crate) fn emit_sign_in(&self, id: &str, role: Role) {
        let session = self.sign_in_as(id, role);
        self.emit(AuthEvent::SignedIn(session));
    }

    pub(crate) fn set_assurance(&self, assurance: Result<AssuranceLevel, ProviderError>) {
        self.lock().assurance = assurance;
    }

    /// Block assurance reads until a permit is added to the returned semaphore.
    pub(crate) fn hold_assurance(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().assurance_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn assurance_waiting(&self) -> bool {
        self.assurance_waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn add_factor(&self, id: &str, factor_type: &str, status: &str) {
        self.lock().factors.push(Factor {
            id: id.to_string(),
            factor_type: factor_type.to_string(),
            status: status.to_string(),
        });
    }

    pub(crate) fn verified_factor(&self) -> Option<String> {
        self.lock().verified_factor.clone()
    }

    pub(crate) fn reject_codes(&self) {
        self.lock().reject_codes = true;
    }

    pub(crate) fn fail_sign_out(&self) {
        self.lock().fail_sign_out = true;
    }

    pub(crate) fn sign_out_calls(&self) -> usize {
        self.lock().sign_out_calls
    }

    pub(crate) fn adopted(&self) -> usize {
        self.lock().adopted
    }
}

#[async_trait]
impl ClientIdentity for FakeIdentity {
    async fn current_session(&self) -> Result<Option<ClientSession>, ProviderError> {
        Ok(self.session())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        {
            let mut state = self.lock();
            state.sign_out_calls += 1;
            if state.fail_sign_out {
                return Err(ProviderError::Unavailable("offline".to_string()));
            }
            state.session = None;
        }
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn assurance_level(&self) -> Result<AssuranceLevel, ProviderError> {
        let gate = self.lock().assurance_gate.clone();
        if let Some(gate) = gate {
            self.assurance_waiting.store(true, Ordering::SeqCst);
            let _permit = gate.acquire().await;
        }
        self.lock().assurance.clone()
    }

    async fn list_factors(&self) -> Result<Vec<Factor>, ProviderError> {
        Ok(self.lock().factors.clone())
    }

    async fn enroll_totp(&self) -> Result<TotpEnrollment, ProviderError> {
        let mut state = self.lock();
        let factor_id = format!("factor-{}", state.factors.len() + 1);
        state.factors.push(Factor {
            id: factor_id.clone(),
            factor_type: "totp".to_string(),
            status: "unverified".to_string(),
        });
        Ok(TotpEnrollment {
            factor_id,
            qr_code: "data:image/svg+xml;utf-8,<svg/>".to_string(),
            secret: SecretString::from("JBSWY3DPEHPK3PXP"),
            uri: "otpauth://totp/hrms".to_string(),
        })
    }

    async fn challenge(&self, factor_id: &str) -> Result<String, ProviderError> {
        let state = self.lock();
        if state.factors.iter().any(|factor| factor.id == factor_id) {
            Ok(format!("challenge-{factor_id}"))
        } else {
            Err(ProviderError::Rejected("Factor not found".to_string()))
        }
    }

    async fn verify(
        &self,
        factor_id: &str,
        _challenge_id: &str,
        _code: &str,
    ) -> Result<(), ProviderError> {
        let session = {
            let mut state = self.lock();
            if state.reject_codes {
                return Err(ProviderError::Rejected("Invalid TOTP code entered".to_string()));
            }
            state.verified_factor = Some(factor_id.to_string());
            state.assurance = Ok(AssuranceLevel::Aal2);
            for factor in &mut state.factors {
                if factor.id == factor_id {
                    factor.status = "verified".to_string();
                }
            }
            state.session.clone()
        };
        if let Some(session) = session {
            self.emit(AuthEvent::StepUpVerified(session));
        }
        Ok(())
    }

    async fn adopt_session(&self, signed_in: SignedIn) -> Result<(), ProviderError> {
        let session = ClientSession::from(signed_in);
        {
            let mut state = self.lock();
            state.session = Some(session.clone());
            state.adopted += 1;
        }
        self.emit(AuthEvent::SignedIn(session));
        Ok(())
    }

    fn oauth_sign_in_url(&self, provider: &str, redirect_to: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse("https://id.example.com/auth/v1/authorize")
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to);
        Ok(url)
    }
}
