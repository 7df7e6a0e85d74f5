//! Read side of the audit trail.

use super::auth::{
    ApiError, AuthState,
    principal::{require_auth, require_role},
    types::{AuditLogQuery, ErrorResponse},
};
use crate::{
    audit::{AuditFilter, AuditRecord},
    identity::Role,
};
use axum::{
    extract::{Extension, Json, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Roles allowed to read the trail.
pub const AUDIT_READERS: [Role; 3] = [Role::Admin, Role::Hr, Role::Security];

#[utoipa::path(
    get,
    path = "/audit-logs",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Most recent records, newest first", body = [AuditRecord]),
        (status = 401, description = "Missing or dead bearer token", body = ErrorResponse),
        (status = 403, description = "Role may not read the audit trail", body = ErrorResponse),
        (status = 503, description = "Audit store unavailable", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "audit"
)]
pub async fn audit_logs(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Query(query): Query<AuditLogQuery>,
) -> impl IntoResponse {
    match audit_logs_inner(&headers, &auth_state, &query).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn audit_logs_inner(
    headers: &HeaderMap,
    auth_state: &AuthState,
    query: &AuditLogQuery,
) -> Result<Vec<AuditRecord>, ApiError> {
    let principal = require_auth(headers, auth_state.provider()).await?;
    require_role(&principal, &AUDIT_READERS)?;

    let filter = AuditFilter::new(query.search.as_deref(), query.category.as_deref());
    match auth_state.audit().list(&filter).await {
        Ok(records) => {
            debug!("Returning {} audit records", records.len());
            Ok(records)
        }
        Err(err) => {
            error!("Failed to list audit records: {err}");
            Err(ApiError::Unavailable(
                "Audit log temporarily unavailable".to_string(),
            ))
        }
    }
}
