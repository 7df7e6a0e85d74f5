//! Login ceiling over the audit trail.
//!
//! Instances share no memory; the count of trailing `LOGIN_FAILED` events is the only
//! cross-request state. Two concurrent attempts can both read a count below the ceiling.

use super::state::AuthConfig;
use crate::audit::{AuditError, AuditStore};
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// Decide whether a login for `email` may reach the credential check.
///
/// # Errors
/// Returns `AuditError` when the failure count cannot be read. Callers fail closed.
pub async fn check_login(
    audit: &dyn AuditStore,
    config: &AuthConfig,
    email: &str,
    now: DateTime<Utc>,
) -> Result<RateLimitDecision, AuditError> {
    let since = now - config.login_window();
    let failures = audit.count_login_failures(email, since).await?;
    debug!("{failures} login failures in window");
    if failures >= config.login_max_failures() {
        Ok(RateLimitDecision::Limited)
    } else {
        Ok(RateLimitDecision::Allowed)
    }
}
