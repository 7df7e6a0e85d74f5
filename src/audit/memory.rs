//! In-process audit store.
//!
//! Used when no database DSN is configured. Counts are per process, so the login ceiling
//! only holds for a single instance.
//!
//! Records older than the retention period are pruned on write, except the newest
//! [`DEFAULT_LIST_LIMIT`] which `list` can still return.

use super::{
    AuditAction, AuditError, AuditFilter, AuditRecord, AuditStore, CATEGORY_AUTH,
    DEFAULT_LIST_LIMIT, NewAuditEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_RETENTION_HOURS: i64 = 24;

#[derive(Debug)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
    retention: TimeDelta,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            retention: TimeDelta::hours(DEFAULT_RETENTION_HOURS),
        }
    }
}

impl MemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep records for at least `retention`. Must cover the login window.
    #[must_use]
    pub fn with_retention(mut self, retention: TimeDelta) -> Self {
        self.retention = retention;
        self
    }

    /// Snapshot of every stored record in insertion order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

/// Drop records older than `cutoff` that are not among the newest listable ones.
fn prune(records: &mut Vec<AuditRecord>, cutoff: DateTime<Utc>) {
    let keep = usize::try_from(DEFAULT_LIST_LIMIT).unwrap_or(usize::MAX);
    if records.len() <= keep {
        return;
    }

    let mut timestamps: Vec<DateTime<Utc>> =
        records.iter().map(|record| record.timestamp).collect();
    let (_, listable_from, _) = timestamps.select_nth_unstable_by(keep - 1, |a, b| b.cmp(a));
    let listable_from = *listable_from;

    let before = records.len();
    records.retain(|record| record.timestamp >= cutoff || record.timestamp >= listable_from);
    if records.len() < before {
        debug!("Pruned {} audit records", before - records.len());
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn record(&self, event: NewAuditEvent) -> Result<(), AuditError> {
        let record = AuditRecord::from_event(Uuid::new_v4(), event);
        let cutoff = record.timestamp - self.retention;
        let mut records = self.records.lock().await;
        records.push(record);
        prune(&mut records, cutoff);
        Ok(())
    }

    async fn count_login_failures(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, AuditError> {
        let records = self.records.lock().await;
        let count = records
            .iter()
            .filter(|record| {
                record.category == CATEGORY_AUTH
                    && record.action == AuditAction::LoginFailed.as_str()
                    && record.actor_email.as_deref() == Some(email)
                    && record.timestamp >= since
            })
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.lock().await;
        let mut matching: Vec<AuditRecord> = records
            .iter()
            .filter(|record| record.matches(filter))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(usize::try_from(DEFAULT_LIST_LIMIT).unwrap_or(usize::MAX));
        Ok(matching)
    }

    async fn ping(&self) -> Result<(), AuditError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
