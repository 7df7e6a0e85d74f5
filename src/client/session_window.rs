//! Per-identity session window.
//!
//! The window is fixed when the identity signs in and is never extended by activity or
//! token refresh. Once it closes the enclosing policy signs the identity out.

use super::{
    read_epoch_ms,
    store::{KeyValueStore, StoreError},
    write_epoch_ms,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

pub const DEFAULT_SESSION_HORIZON_DAYS: i64 = 7;

#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn KeyValueStore>,
    horizon: TimeDelta,
}

impl SessionTracker {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            horizon: TimeDelta::days(DEFAULT_SESSION_HORIZON_DAYS),
        }
    }

    #[must_use]
    pub fn with_horizon(mut self, horizon: TimeDelta) -> Self {
        self.horizon = horizon;
        self
    }

    #[must_use]
    pub fn horizon(&self) -> TimeDelta {
        self.horizon
    }

    fn key(subject: &str) -> String {
        format!("auth.{subject}.sessionExpiresAt")
    }

    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn expires_at(&self, subject: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        read_epoch_ms(self.store.as_ref(), &Self::key(subject)).await
    }

    /// Start a window at `now` unless one is already stored. Returns the stored expiry.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn ensure_window(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        if let Some(expires_at) = self.expires_at(subject).await? {
            return Ok(expires_at);
        }
        self.set_expiry_from_sign_in(subject, now).await
    }

    /// True only when an expiry is stored and `now` is past it.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn is_expired(&self, subject: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .expires_at(subject)
            .await?
            .is_some_and(|expires_at| now > expires_at))
    }

    /// Open a fresh window. Only called on a sign-in event.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be written.
    pub async fn set_expiry_from_sign_in(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let expires_at = now + self.horizon;
        write_epoch_ms(self.store.as_ref(), &Self::key(subject), expires_at).await?;
        Ok(expires_at)
    }

    /// # Errors
    /// Returns `StoreError` if the store cannot be written.
    pub async fn clear(&self, subject: &str) -> Result<(), StoreError> {
        self.store.remove(&Self::key(subject)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MemoryStore;
    use anyhow::Result;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default()
    }

    fn tracker() -> (Arc<MemoryStore>, SessionTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = SessionTracker::new(store.clone());
        (store, tracker)
    }

    #[tokio::test]
    async fn sign_in_sets_seven_day_expiry() -> Result<()> {
        let (store, tracker) = tracker();
        let expires_at = tracker.set_expiry_from_sign_in("u1", t0()).await?;
        assert_eq!(expires_at, t0() + TimeDelta::days(7));
        assert_eq!(
            store.get("auth.u1.sessionExpiresAt").await?,
            Some(expires_at.timestamp_millis().to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn expiry_boundary_is_exclusive() -> Result<()> {
        let (_, tracker) = tracker();
        let expires_at = tracker.set_expiry_from_sign_in("u1", t0()).await?;
        assert!(!tracker.is_expired("u1", expires_at).await?);
        assert!(
            tracker
                .is_expired("u1", expires_at + TimeDelta::milliseconds(1))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn ensure_window_is_idempotent() -> Result<()> {
        let (_, tracker) = tracker();
        let first = tracker.ensure_window("u1", t0()).await?;
        let second = tracker
            .ensure_window("u1", t0() + TimeDelta::days(3))
            .await?;
        assert_eq!(first, second);
        assert_eq!(first, t0() + TimeDelta::days(7));
        Ok(())
    }

    #[tokio::test]
    async fn missing_window_is_not_expired() -> Result<()> {
        let (_, tracker) = tracker();
        assert!(
            !tracker
                .is_expired("u1", t0() + TimeDelta::days(365))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_resets_existing_window() -> Result<()> {
        let (_, tracker) = tracker();
        tracker.ensure_window("u1", t0()).await?;
        let later = t0() + TimeDelta::days(6);
        let expires_at = tracker.set_expiry_from_sign_in("u1", later).await?;
        assert_eq!(expires_at, later + TimeDelta::days(7));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_value_is_replaced_by_ensure() -> Result<()> {
        let (store, tracker) = tracker();
        store.set("auth.u1.sessionExpiresAt", "garbage").await?;
        assert_eq!(tracker.expires_at("u1").await?, None);
        let expires_at = tracker.ensure_window("u1", t0()).await?;
        assert_eq!(expires_at, t0() + TimeDelta::days(7));
        Ok(())
    }

    #[tokio::test]
    async fn clear_removes_window() -> Result<()> {
        let (_, tracker) = tracker();
        tracker.ensure_window("u1", t0()).await?;
        tracker.clear("u1").await?;
        assert_eq!(tracker.expires_at("u1").await?, None);
        Ok(())
    }
}
