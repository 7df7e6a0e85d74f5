//! Append-only audit trail.
//!
//! The trail is both the security log shown to operators and the only input to the
//! server-side login ceiling: failed logins are counted straight from it, so there is no
//! separate counter to drift out of sync.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

pub use memory::MemoryAuditStore;
pub use postgres::PgAuditStore;

/// Category shared by every authentication event.
pub const CATEGORY_AUTH: &str = "auth";

/// Most records the reader returns per query.
pub const DEFAULT_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    LoginFailed,
    LoginSuccess,
    AdminCreateUser,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginFailed => "LOGIN_FAILED",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::AdminCreateUser => "ADMIN_CREATE_USER",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event to append. `timestamp` comes from the caller's clock.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub timestamp: DateTime<Utc>,
    pub actor_user_id: Option<String>,
    pub actor_email: Option<String>,
    pub action: AuditAction,
    pub category: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<Value>,
}

impl NewAuditEvent {
    /// Authentication event about an account.
    #[must_use]
    pub fn auth(action: AuditAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            actor_user_id: None,
            actor_email: None,
            action,
            category: CATEGORY_AUTH,
            entity_type: "Auth",
            entity_id: None,
            ip_address: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_actor(mut self, user_id: Option<&str>, email: Option<&str>) -> Self {
        self.actor_user_id = user_id.map(str::to_string);
        self.actor_email = email.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity_type: &'static str, entity_id: Option<&str>) -> Self {
        self.entity_type = entity_type;
        self.entity_id = entity_id.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Stored audit record as returned by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor_user_id: Option<String>,
    pub actor_email: Option<String>,
    pub action: String,
    pub category: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub ip_address: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

impl AuditRecord {
    #[must_use]
    pub fn from_event(id: Uuid, event: NewAuditEvent) -> Self {
        Self {
            id,
            timestamp: event.timestamp,
            actor_user_id: event.actor_user_id,
            actor_email: event.actor_email,
            action: event.action.as_str().to_string(),
            category: event.category.to_string(),
            entity_type: event.entity_type.to_string(),
            entity_id: event.entity_id,
            ip_address: event.ip_address,
            metadata: event.metadata,
        }
    }

    fn matches(&self, filter: &AuditFilter) -> bool {
        if let Some(category) = filter.category() {
            if self.category != category {
                return false;
            }
        }
        match filter.search() {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                [
                    Some(self.action.as_str()),
                    self.actor_email.as_deref(),
                    Some(self.entity_type.as_str()),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle))
            }
        }
    }
}

/// Reader-side filter. `category == "all"` and blank values mean "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    search: Option<String>,
    category: Option<String>,
}

impl AuditFilter {
    #[must_use]
    pub fn new(search: Option<&str>, category: Option<&str>) -> Self {
        let clean = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            search: clean(search),
            category: clean(category).filter(|category| category != "all"),
        }
    }

    #[must_use]
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Audit store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one event.
    async fn record(&self, event: NewAuditEvent) -> Result<(), AuditError>;

    /// Count `auth` / `LOGIN_FAILED` events for `email` at or after `since`.
    async fn count_login_failures(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, AuditError>;

    /// Newest first, at most [`DEFAULT_LIST_LIMIT`] records.
    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Backend reachability, reported by `/health`.
    async fn ping(&self) -> Result<(), AuditError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// Append `event`, logging and swallowing any failure.
pub async fn record_best_effort(store: &dyn AuditStore, event: NewAuditEvent) {
    let action = event.action;
    if let Err(err) = store.record(event).await {
        warn!("Failed to record audit event {action}: {err}");
    }
}
