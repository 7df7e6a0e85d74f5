//! Step-up (MFA) re-verification cadence.
//!
//! Each identity has a deadline, initialized once and advanced only by a successful
//! challenge/verify round trip. Past the deadline, step-up is required unless the current
//! session already carries `aal2`. Any read failure counts as "required".

use super::{
    provider::ClientIdentity,
    read_epoch_ms,
    store::{KeyValueStore, StoreError},
    write_epoch_ms,
};
use crate::{
    clock::Clock,
    identity::{Factor, ProviderError, TotpEnrollment},
};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_STEP_UP_HORIZON_DAYS: i64 = 7;

#[derive(Clone)]
pub struct StepUpTracker {
    store: Arc<dyn KeyValueStore>,
    horizon: TimeDelta,
}

impl StepUpTracker {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            horizon: TimeDelta::days(DEFAULT_STEP_UP_HORIZON_DAYS),
        }
    }

    #[must_use]
    pub fn with_horizon(mut self, horizon: TimeDelta) -> Self {
        self.horizon = horizon;
        self
    }

    fn key(subject: &str) -> String {
        format!("auth.{subject}.mfaDeadlineAt")
    }

    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn deadline(&self, subject: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        read_epoch_ms(self.store.as_ref(), &Self::key(subject)).await
    }

    /// Initialize the deadline at `now + horizon` unless one is stored.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn ensure_deadline(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        if let Some(deadline) = self.deadline(subject).await? {
            return Ok(deadline);
        }
        let deadline = now + self.horizon;
        write_epoch_ms(self.store.as_ref(), &Self::key(subject), deadline).await?;
        Ok(deadline)
    }

    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn is_due(&self, subject: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .deadline(subject)
            .await?
            .is_some_and(|deadline| now > deadline))
    }

    /// Advance the deadline after a verified challenge.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be written.
    pub async fn mark_verified(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let deadline = now + self.horizon;
        write_epoch_ms(self.store.as_ref(), &Self::key(subject), deadline).await?;
        Ok(deadline)
    }
}

/// Decide whether `subject` must step up now.
pub async fn step_up_required(
    tracker: &StepUpTracker,
    provider: &dyn ClientIdentity,
    subject: &str,
    now: DateTime<Utc>,
) -> bool {
    if let Err(err) = tracker.ensure_deadline(subject, now).await {
        warn!("Failed to initialize step-up deadline: {err}");
        return true;
    }

    match tracker.is_due(subject, now).await {
        Ok(false) => return false,
        Ok(true) => {}
        Err(err) => {
            warn!("Failed to read step-up deadline: {err}");
            return true;
        }
    }

    match provider.assurance_level().await {
        Ok(level) => {
            debug!("Step-up due, current assurance level {level:?}");
            !level.is_verified()
        }
        Err(err) => {
            warn!("Failed to read assurance level, requiring step-up: {err}");
            true
        }
    }
}

#[derive(Debug, Error)]
pub enum StepUpError {
    #[error("No step-up factor found. Enroll first.")]
    NoFactor,
    #[error("Invalid code. Try again.")]
    InvalidCode,
    #[error("No active session")]
    NoSession,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Enrollment and verification of the TOTP step-up factor for the current session.
pub struct StepUpFlow {
    provider: Arc<dyn ClientIdentity>,
    tracker: StepUpTracker,
    clock: Arc<dyn Clock>,
}

impl StepUpFlow {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ClientIdentity>,
        tracker: StepUpTracker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            tracker,
            clock,
        }
    }

    /// First verified TOTP factor, if any.
    ///
    /// # Errors
    /// Returns `StepUpError::Provider` if the factors cannot be listed.
    pub async fn preferred_factor(&self) -> Result<Option<Factor>, StepUpError> {
        let factors = self.provider.list_factors().await?;
        Ok(factors.into_iter().find(Factor::is_verified_totp))
    }

    /// Enroll a new TOTP factor. The caller shows the QR code and secret.
    ///
    /// # Errors
    /// Returns `StepUpError::Provider` if enrollment is rejected.
    pub async fn enroll(&self) -> Result<TotpEnrollment, StepUpError> {
        let enrollment = self.provider.enroll_totp().await?;
        info!("Enrolled TOTP factor {}", enrollment.factor_id);
        Ok(enrollment)
    }

    /// Challenge `factor_id` (or the preferred factor) and answer with `code`. On success
    /// the step-up deadline moves to `now + horizon` and is returned.
    ///
    /// # Errors
    /// Returns `StepUpError::InvalidCode` for a malformed or rejected code.
    pub async fn verify(
        &self,
        factor_id: Option<&str>,
        code: &str,
    ) -> Result<DateTime<Utc>, StepUpError> {
        let code = code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(StepUpError::InvalidCode);
        }

        let subject = self
            .provider
            .current_session()
            .await?
            .map(|session| session.user.id)
            .ok_or(StepUpError::NoSession)?;

        let factor_id = match factor_id {
            Some(id) => id.to_string(),
            None => self
                .preferred_factor()
                .await?
                .map(|factor| factor.id)
                .ok_or(StepUpError::NoFactor)?,
        };

        let challenge_id = self.provider.challenge(&factor_id).await?;
        match self.provider.verify(&factor_id, &challenge_id, code).await {
            Ok(()) => {}
            Err(ProviderError::Rejected(reason)) => {
                debug!("Step-up code rejected: {reason}");
                return Err(StepUpError::InvalidCode);
            }
            Err(err) => return Err(err.into()),
        }

        let deadline = self.tracker.mark_verified(&subject, self.clock.now()).await?;
        info!("Step-up verified, next due after {deadline}");
        Ok(deadline)
    }
}
