//! Escalating login lockout, local to one device.
//!
//! This only throttles the sign-in form. The authoritative ceiling is the server-side
//! failure count over the audit trail.
//!
//! | failures | lock       |
//! |----------|------------|
//! | 1-4      | none       |
//! | 5        | 1 minute   |
//! | 6        | 2 minutes  |
//! | 7        | 5 minutes  |
//! | 8+       | 15 minutes |

use super::{
    scheduler::{TaskHandle, spawn_repeating},
    store::{KeyValueStore, StoreError},
};
use crate::clock::Clock;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, warn};

pub const COUNTDOWN_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutState {
    #[serde(alias = "failures")]
    pub failure_count: u32,
    /// Epoch milliseconds. Equal to `last_failure_at` when no lock applies.
    pub locked_until: i64,
    /// Epoch milliseconds.
    pub last_failure_at: i64,
}

/// Lock applied after the `failure_count`-th consecutive failure.
#[must_use]
pub fn lock_duration(failure_count: u32) -> TimeDelta {
    match failure_count {
        0..=4 => TimeDelta::zero(),
        5 => TimeDelta::minutes(1),
        6 => TimeDelta::minutes(2),
        7 => TimeDelta::minutes(5),
        _ => TimeDelta::minutes(15),
    }
}

#[derive(Clone)]
pub struct LoginLockout {
    store: Arc<dyn KeyValueStore>,
}

impl LoginLockout {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(identifier: &str) -> String {
        format!("login.rateLimit.{}", identifier.trim().to_lowercase())
    }

    /// Stored state. Unreadable entries are treated as absent.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn state(&self, identifier: &str) -> Result<Option<LockoutState>, StoreError> {
        let Some(raw) = self.store.get(&Self::key(identifier)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!("Ignoring unreadable lockout state: {err}");
                Ok(None)
            }
        }
    }

    /// Time left on the current lock, zero when unlocked.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn remaining_lock(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Duration, StoreError> {
        let Some(state) = self.state(identifier).await? else {
            return Ok(Duration::ZERO);
        };
        let remaining_ms = state.locked_until.saturating_sub(now.timestamp_millis());
        Ok(u64::try_from(remaining_ms).map_or(Duration::ZERO, Duration::from_millis))
    }

    /// Count one more failure and apply the lock from the table.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn register_failure(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, StoreError> {
        let failure_count = self
            .state(identifier)
            .await?
            .map_or(0, |state| state.failure_count)
            .saturating_add(1);
        let lock = lock_duration(failure_count);
        let state = LockoutState {
            failure_count,
            locked_until: (now + lock).timestamp_millis(),
            last_failure_at: now.timestamp_millis(),
        };

        let raw = serde_json::to_string(&state)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        self.store.set(&Self::key(identifier), &raw).await?;

        debug!(
            "Registered login failure {failure_count}, locked for {}s",
            lock.num_seconds()
        );
        Ok(state)
    }

    /// Forget all failures after a confirmed successful login.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be written.
    pub async fn reset_failures(&self, identifier: &str) -> Result<(), StoreError> {
        self.store.remove(&Self::key(identifier)).await
    }
}

/// Publish the remaining lock for `identifier` every [`COUNTDOWN_PERIOD`].
///
/// The first value is computed before returning. The countdown runs until the returned
/// handle is dropped.
pub async fn spawn_countdown(
    lockout: LoginLockout,
    identifier: String,
    clock: Arc<dyn Clock>,
) -> (watch::Receiver<Duration>, TaskHandle) {
    let initial = lockout
        .remaining_lock(&identifier, clock.now())
        .await
        .unwrap_or_else(|err| {
            warn!("Failed to read lockout state: {err}");
            Duration::ZERO
        });
    let (tx, rx) = watch::channel(initial);
    let tx = Arc::new(tx);

    let handle = spawn_repeating("login-countdown", COUNTDOWN_PERIOD, move || {
        let lockout = lockout.clone();
        let identifier = identifier.clone();
        let clock = clock.clone();
        let tx = tx.clone();
        async move {
            match lockout.remaining_lock(&identifier, clock.now()).await {
                Ok(remaining) => {
                    tx.send_replace(remaining);
                }
                Err(err) => warn!("Failed to read lockout state: {err}"),
            }
        }
    });

    (rx, handle)
}
