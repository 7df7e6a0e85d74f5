//! Session and step-up policy for the device.
//!
//! Evaluation runs on boot, on every auth-state event from the provider, and on a fixed
//! tick while the process lives:
//!
//! 1. no live identity: clear the step-up flag;
//! 2. ensure the session window and the step-up deadline exist;
//! 3. window closed: sign out of the provider, clear the flag, stop;
//! 4. otherwise decide whether step-up is due.
//!
//! Results are published as an [`AuthSnapshot`] on a watch channel. A result computed for an
//! identity that is no longer current is discarded.

use super::{
    provider::{AuthEvent, ClientIdentity},
    scheduler::{TaskHandle, spawn_repeating},
    session_window::SessionTracker,
    step_up::{StepUpTracker, step_up_required},
    store::KeyValueStore,
};
use crate::{clock::Clock, identity::Identity};
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, error, info, warn};

pub const POLICY_TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    /// True until the stored session has been evaluated once.
    pub loading: bool,
    pub identity: Option<Identity>,
    pub needs_step_up: bool,
    /// The last identity was signed out because its window closed.
    pub session_expired: bool,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            loading: true,
            identity: None,
            needs_step_up: false,
            session_expired: false,
        }
    }
}

impl AuthSnapshot {
    fn subject(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.id.as_str())
    }
}

pub struct AuthPolicy {
    provider: Arc<dyn ClientIdentity>,
    sessions: SessionTracker,
    step_up: StepUpTracker,
    clock: Arc<dyn Clock>,
    state: watch::Sender<AuthSnapshot>,
    tick: Duration,
}

impl AuthPolicy {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ClientIdentity>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            sessions: SessionTracker::new(store.clone()),
            step_up: StepUpTracker::new(store),
            clock,
            state: watch::Sender::new(AuthSnapshot::default()),
            tick: POLICY_TICK,
        }
    }

    #[must_use]
    pub fn with_trackers(mut self, sessions: SessionTracker, step_up: StepUpTracker) -> Self {
        self.sessions = sessions;
        self.step_up = step_up;
        self
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    #[must_use]
    pub fn step_up(&self) -> &StepUpTracker {
        &self.step_up
    }

    /// Evaluate the stored provider session and leave the loading state.
    pub async fn boot(&self) {
        self.resync().await;
        self.state.send_modify(|snapshot| snapshot.loading = false);
    }

    /// Re-read the provider's current session and re-evaluate.
    pub async fn resync(&self) {
        let identity = match self.provider.current_session().await {
            Ok(session) => session.map(|session| session.user),
            Err(err) => {
                warn!("Failed to read current session: {err}");
                None
            }
        };
        self.set_identity(identity);
        self.apply_rules().await;
    }

    pub async fn handle_event(&self, event: &AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                let subject = session.user.id.as_str();
                let now = self.clock.now();
                info!("Signed in, opening a new session window");
                if let Err(err) = self.sessions.set_expiry_from_sign_in(subject, now).await {
                    error!("Failed to store session window: {err}");
                }
                if let Err(err) = self.step_up.ensure_deadline(subject, now).await {
                    error!("Failed to store step-up deadline: {err}");
                }
                self.set_identity(Some(session.user.clone()));
            }
            AuthEvent::TokenRefreshed(session) | AuthEvent::StepUpVerified(session) => {
                self.set_identity(Some(session.user.clone()));
            }
            AuthEvent::SignedOut => {
                let previous = self.snapshot().identity;
                if let Some(identity) = previous {
                    if let Err(err) = self.sessions.clear(&identity.id).await {
                        warn!("Failed to clear session window: {err}");
                    }
                }
                self.set_identity(None);
            }
        }
        self.apply_rules().await;
    }

    /// Periodic re-evaluation of the current identity.
    pub async fn tick(&self) {
        debug!("Policy tick");
        self.apply_rules().await;
    }

    pub async fn apply_rules(&self) {
        let Some(subject) = self.snapshot().subject().map(str::to_string) else {
            self.state.send_if_modified(|snapshot| {
                let modified = snapshot.needs_step_up;
                snapshot.needs_step_up = false;
                modified
            });
            return;
        };
        let now = self.clock.now();

        let window = self.sessions.ensure_window(&subject, now).await;
        if let Err(err) = self.step_up.ensure_deadline(&subject, now).await {
            warn!("Failed to ensure step-up deadline: {err}");
        }

        // An unreadable window is treated as closed.
        let expired = match window {
            Ok(_) => self
                .sessions
                .is_expired(&subject, now)
                .await
                .unwrap_or_else(|err| {
                    warn!("Failed to read session window: {err}");
                    true
                }),
            Err(err) => {
                warn!("Failed to ensure session window: {err}");
                true
            }
        };
        if expired {
            self.expire(&subject).await;
            return;
        }

        let needs_step_up =
            step_up_required(&self.step_up, self.provider.as_ref(), &subject, now).await;
        self.update_if_current(&subject, |snapshot| {
            snapshot.needs_step_up = needs_step_up;
        });
    }

    async fn expire(&self, subject: &str) {
        info!("Session window closed, signing out");
        match self.provider.sign_out().await {
            Ok(()) => {
                if let Err(err) = self.sessions.clear(subject).await {
                    warn!("Failed to clear session window: {err}");
                }
            }
            // The window stays closed, so the next evaluation retries.
            Err(err) => error!("Failed to sign out expired session: {err}"),
        }
        self.update_if_current(subject, |snapshot| {
            snapshot.identity = None;
            snapshot.needs_step_up = false;
            snapshot.session_expired = true;
        });
    }

    fn set_identity(&self, identity: Option<Identity>) {
        self.state.send_if_modified(|snapshot| {
            let new_subject = identity.as_ref().map(|identity| identity.id.as_str());
            let changed_subject = snapshot.subject() != new_subject;
            if changed_subject {
                // Held until this identity has been evaluated.
                snapshot.needs_step_up = identity.is_some();
                if identity.is_some() {
                    snapshot.session_expired = false;
                }
            }
            let modified = changed_subject || snapshot.identity != identity;
            snapshot.identity = identity;
            modified
        });
    }

    fn update_if_current(&self, subject: &str, update: impl FnOnce(&mut AuthSnapshot)) -> bool {
        self.state.send_if_modified(|snapshot| {
            if snapshot.subject() != Some(subject) {
                debug!("Discarding policy result for a stale identity");
                return false;
            }
            let before = snapshot.clone();
            update(snapshot);
            *snapshot != before
        })
    }

    /// Boot, then follow provider events and tick until the handle is dropped.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> PolicyHandle {
        // Subscribe before booting so no event between the two is lost.
        let mut events = self.provider.subscribe();

        let policy = self.clone();
        let listener = tokio::spawn(async move {
            policy.boot().await;
            loop {
                match events.recv().await {
                    Ok(event) => policy.handle_event(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {skipped} auth events, resyncing");
                        policy.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let policy = self.clone();
        let ticker = spawn_repeating("auth-policy-tick", self.tick, move || {
            let policy = policy.clone();
            async move { policy.tick().await }
        });

        PolicyHandle {
            policy: self,
            _listener: TaskHandle::from_join_handle("auth-policy-events", listener),
            _ticker: ticker,
        }
    }
}

/// Running policy. Dropping it stops the event listener and the tick.
pub struct PolicyHandle {
    policy: Arc<AuthPolicy>,
    _listener: TaskHandle,
    _ticker: TaskHandle,
}

impl PolicyHandle {
    #[must_use]
    pub fn policy(&self) -> &Arc<AuthPolicy> {
        &self.policy
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.policy.subscribe()
    }

    /// Wait until the first evaluation has finished.
    pub async fn ready(&self) -> AuthSnapshot {
        let mut rx = self.policy.subscribe();
        let snapshot = match rx.wait_for(|snapshot| !snapshot.loading).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.policy.snapshot(),
        };
        snapshot
    }
}
