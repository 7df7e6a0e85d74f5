//! `PostgreSQL` audit store backed by the `audit_logs` table (see `sql/schema.sql`).
//!
//! Every instance reads and writes the same table, so the login ceiling is shared across
//! instances (soft: concurrent attempts may both read a count below the ceiling).

use super::{
    AuditAction, AuditError, AuditFilter, AuditRecord, AuditStore, CATEGORY_AUTH,
    DEFAULT_LIST_LIMIT, NewAuditEvent,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{Connection, PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::time::Duration;
use tracing::{Instrument, info_span};
use uuid::Uuid;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &SecretString) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(dsn.expose_secret())
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }
}

/// Escape `LIKE` wildcards in user input and wrap it for a substring match.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn record_from_row(row: &PgRow) -> Result<AuditRecord, sqlx::Error> {
    Ok(AuditRecord {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        actor_user_id: row.try_get("actor_user_id")?,
        actor_email: row.try_get("actor_email")?,
        action: row.try_get("action")?,
        category: row.try_get("category")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        ip_address: row.try_get("ip_address")?,
        metadata: row.try_get("metadata")?,
    })
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn record(&self, event: NewAuditEvent) -> Result<(), AuditError> {
        let query = r"
            INSERT INTO audit_logs
                (id, timestamp, actor_user_id, actor_email, action, category,
                 entity_type, entity_id, ip_address, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(event.timestamp)
            .bind(event.actor_user_id)
            .bind(event.actor_email)
            .bind(event.action.as_str())
            .bind(event.category)
            .bind(event.entity_type)
            .bind(event.entity_id)
            .bind(event.ip_address)
            .bind(event.metadata)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn count_login_failures(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, AuditError> {
        let query = r"
            SELECT COUNT(*)
            FROM audit_logs
            WHERE category = $1
              AND action = $2
              AND actor_email = $3
              AND timestamp >= $4
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(CATEGORY_AUTH)
            .bind(AuditAction::LoginFailed.as_str())
            .bind(email)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let query = r"
            SELECT id, timestamp, actor_user_id, actor_email, action, category,
                   entity_type, entity_id, ip_address, metadata
            FROM audit_logs
            WHERE ($1::text IS NULL OR category = $1)
              AND ($2::text IS NULL
                   OR action ILIKE $2
                   OR actor_email ILIKE $2
                   OR entity_type ILIKE $2)
            ORDER BY timestamp DESC
            LIMIT $3
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(query)
            .bind(filter.category())
            .bind(filter.search().map(like_pattern))
            .bind(DEFAULT_LIST_LIMIT)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        rows.iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AuditError::from)
    }

    async fn ping(&self) -> Result<(), AuditError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgresql"
    }
}
