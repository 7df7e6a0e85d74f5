//! Auth state and configuration shared by the handlers.

use crate::{audit::AuditStore, clock::Clock, identity::IdentityProvider};
use chrono::TimeDelta;
use std::sync::Arc;

const DEFAULT_LOGIN_WINDOW_MINUTES: i64 = 15;
const DEFAULT_LOGIN_MAX_FAILURES: i64 = 10;
/// One week.
pub const MAX_LOGIN_WINDOW_MINUTES: i64 = 10_080;
const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:3000";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    login_window_minutes: i64,
    login_max_failures: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTEND_BASE_URL.to_string())
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            login_window_minutes: DEFAULT_LOGIN_WINDOW_MINUTES,
            login_max_failures: DEFAULT_LOGIN_MAX_FAILURES,
        }
    }

    /// Clamped to `1..=MAX_LOGIN_WINDOW_MINUTES`.
    #[must_use]
    pub fn with_login_window_minutes(mut self, minutes: i64) -> Self {
        self.login_window_minutes = minutes.clamp(1, MAX_LOGIN_WINDOW_MINUTES);
        self
    }

    #[must_use]
    pub fn with_login_max_failures(mut self, max_failures: i64) -> Self {
        self.login_max_failures = max_failures;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn login_window(&self) -> TimeDelta {
        TimeDelta::minutes(self.login_window_minutes)
    }

    #[must_use]
    pub fn login_max_failures(&self) -> i64 {
        self.login_max_failures
    }
}

/// Everything the auth handlers reach through, injected once at startup.
#[derive(Clone)]
pub struct AuthState {
    config: AuthConfig,
    provider: Arc<dyn IdentityProvider>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        provider: Arc<dyn IdentityProvider>,
        audit: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            provider,
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn audit(&self) -> &dyn AuditStore {
        self.audit.as_ref()
    }

    #[must_use]
    pub fn audit_store(&self) -> Arc<dyn AuditStore> {
        self.audit.clone()
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}
