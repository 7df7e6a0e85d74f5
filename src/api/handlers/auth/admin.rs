//! Privileged account creation.
//!
//! Gates run in a fixed order and each one is final:
//! 1) the bearer token resolves to a live identity (401);
//! 2) the same token carries assurance level `aal2` (403), whatever the role;
//! 3) the identity's role is `admin` (403);
//! 4) email and password are present (400).
//!
//! Only then is the provider's privileged API called. The audit record is best effort.

use super::{
    error::ApiError,
    principal::{Principal, require_auth, require_role},
    state::AuthState,
    types::{CreateUserRequest, CreateUserResponse, ErrorResponse},
    utils::{extract_client_ip, normalize_email, required, valid_email},
};
use crate::{
    audit::{AuditAction, NewAuditEvent, record_best_effort},
    identity::{NewAccount, ProviderError, Role},
};
use axum::{
    extract::{Extension, Json},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_NAME: &str = "User";

#[utoipa::path(
    post,
    path = "/admin/create-user",
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "Account created", body = CreateUserResponse),
        (status = 400, description = "Missing or invalid fields", body = ErrorResponse),
        (status = 401, description = "Missing or dead bearer token", body = ErrorResponse),
        (status = 403, description = "Step-up required or not an admin", body = ErrorResponse),
        (status = 503, description = "Identity provider unavailable", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn create_user(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CreateUserRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    match create_user_inner(&headers, &auth_state, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_user_inner(
    headers: &HeaderMap,
    auth_state: &AuthState,
    request: CreateUserRequest,
) -> Result<CreateUserResponse, ApiError> {
    let principal = require_auth(headers, auth_state.provider()).await?;
    require_step_up(auth_state, &principal).await?;
    require_role(&principal, &[Role::Admin])?;
    let account = new_account(request)?;

    let created = match auth_state.provider().admin_create_account(&account).await {
        Ok(created) => created,
        Err(ProviderError::Unavailable(reason)) => {
            error!("Failed to create account: {reason}");
            return Err(ApiError::Unavailable(
                "Identity provider unavailable".to_string(),
            ));
        }
        Err(err) => {
            warn!("Account creation rejected: {err}");
            return Err(ApiError::Validation(match err {
                ProviderError::Rejected(message) => message,
                other => other.to_string(),
            }));
        }
    };

    record_best_effort(
        auth_state.audit(),
        NewAuditEvent::auth(AuditAction::AdminCreateUser, auth_state.clock().now())
            .with_actor(
                Some(&principal.identity.id),
                principal.identity.email.as_deref(),
            )
            .with_entity("User", Some(&created.id))
            .with_ip(extract_client_ip(headers))
            .with_metadata(json!({ "role_assigned": account.role.as_str() })),
    )
    .await;

    info!(
        "Admin {} created account {} with role {}",
        principal.identity.id, created.id, created.role
    );
    Ok(CreateUserResponse { user: created })
}

/// Assurance is read with the caller's own token. A failed read is treated as `aal1`.
async fn require_step_up(auth_state: &AuthState, principal: &Principal) -> Result<(), ApiError> {
    match auth_state
        .provider()
        .assurance_level(&principal.access_token)
        .await
    {
        Ok(level) if level.is_verified() => Ok(()),
        Ok(_) => Err(ApiError::Forbidden(
            "MFA required for this action".to_string(),
        )),
        Err(err) => {
            error!("Failed to read assurance level: {err}");
            Err(ApiError::Forbidden(
                "MFA required for this action".to_string(),
            ))
        }
    }
}

fn new_account(request: CreateUserRequest) -> Result<NewAccount, ApiError> {
    let (Some(email), Some(password)) = (
        required(request.email.as_deref()),
        required(request.password.as_deref()),
    ) else {
        return Err(ApiError::Validation("Missing email or password".to_string()));
    };

    let email = normalize_email(email);
    if !valid_email(&email) {
        return Err(ApiError::Validation("Invalid email".to_string()));
    }

    let role = match required(request.role.as_deref()) {
        None => Role::DEFAULT,
        Some(role) => role
            .parse::<Role>()
            .map_err(|err| ApiError::Validation(err.to_string()))?,
    };

    let name = required(request.name.as_deref())
        .map_or(DEFAULT_NAME, str::trim)
        .to_string();

    Ok(NewAccount {
        email,
        password: SecretString::from(password.to_string()),
        name,
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{
        FakeProvider, ReadOnlyAuditStore, auth_state,
    };
    use crate::audit::MemoryAuditStore;
    use crate::identity::AssuranceLevel;
    use anyhow::Result;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, header::{AUTHORIZATION, CONTENT_TYPE}},
        routing::post,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(state: Arc<AuthState>) -> Router {
        Router::new()
            .route("/admin/create-user", post(create_user))
            .layer(Extension(state))
    }

    async fn call(app: Router, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/admin/create-user")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app.oneshot(request.body(Body::from(body.to_string()))?).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, payload))
    }

    fn valid_body() -> Value {
        json!({ "email": "new@x.com", "password": "pw", "name": "New Hire", "role": "payroll" })
    }

    fn provider() -> Arc<FakeProvider> {
        let provider = Arc::new(FakeProvider::new());
        provider.add_token("admin-aal2", "admin", Role::Admin, AssuranceLevel::Aal2);
        provider.add_token("admin-aal1", "admin", Role::Admin, AssuranceLevel::Aal1);
        provider.add_token("hr-aal2", "hr", Role::Hr, AssuranceLevel::Aal2);
        provider.add_token("hr-aal1", "hr", Role::Hr, AssuranceLevel::Aal1);
        provider.add_token_with(
            "admin-unknown-aal",
            "admin",
            Role::Admin,
            Err(ProviderError::Unavailable("timeout".to_string())),
        );
        provider
    }

    #[tokio::test]
    async fn missing_or_dead_token_is_unauthorized() -> Result<()> {
        let state = auth_state(provider(), Arc::new(MemoryAuditStore::new()));

        let (status, body) = call(app(state.clone()), None, valid_body()).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing bearer token");

        let (status, _) = call(app(state), Some("dead"), valid_body()).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn admin_without_step_up_is_forbidden() -> Result<()> {
        let provider = provider();
        let state = auth_state(provider.clone(), Arc::new(MemoryAuditStore::new()));

        let (status, body) = call(app(state.clone()), Some("admin-aal1"), valid_body()).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "MFA required for this action");

        let (status, body) =
            call(app(state), Some("admin-unknown-aal"), valid_body()).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "MFA required for this action");
        assert!(provider.created().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn step_up_gate_runs_before_role_gate() -> Result<()> {
        let state = auth_state(provider(), Arc::new(MemoryAuditStore::new()));

        let (status, body) = call(app(state.clone()), Some("hr-aal1"), valid_body()).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "MFA required for this action");

        let (status, body) = call(app(state), Some("hr-aal2"), valid_body()).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Forbidden");
        Ok(())
    }

    #[tokio::test]
    async fn role_gate_runs_before_validation() -> Result<()> {
        let state = auth_state(provider(), Arc::new(MemoryAuditStore::new()));

        let (status, _) = call(app(state.clone()), Some("hr-aal2"), json!({})).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(app(state), Some("admin-aal2"), json!({})).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing email or password");
        Ok(())
    }

    #[tokio::test]
    async fn admin_with_step_up_creates_account() -> Result<()> {
        let provider = provider();
        let audit = Arc::new(MemoryAuditStore::new());
        let state = auth_state(provider.clone(), audit.clone());

        let (status, body) = call(app(state), Some("admin-aal2"), valid_body()).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "new@x.com");
        assert_eq!(body["user"]["role"], "payroll");
        assert_eq!(
            provider.created(),
            vec![("new@x.com".to_string(), "pw".to_string(), Role::Payroll)]
        );

        let records = audit.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "ADMIN_CREATE_USER");
        assert_eq!(records[0].entity_type, "User");
        assert_eq!(records[0].actor_user_id.as_deref(), Some("admin"));
        assert_eq!(
            records[0].metadata,
            Some(json!({ "role_assigned": "payroll" }))
        );
        Ok(())
    }

    #[tokio::test]
    async fn role_defaults_to_employee_and_unknown_is_rejected() -> Result<()> {
        let provider = provider();
        let state = auth_state(provider.clone(), Arc::new(MemoryAuditStore::new()));

        let (status, body) = call(
            app(state.clone()),
            Some("admin-aal2"),
            json!({ "email": "a@x.com", "password": "pw" }),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "employee");
        assert_eq!(body["user"]["name"], "User");

        let (status, _) = call(
            app(state),
            Some("admin-aal2"),
            json!({ "email": "b@x.com", "password": "pw", "role": "superuser" }),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(provider.created().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn provider_errors_are_mapped() -> Result<()> {
        let provider = provider();
        let state = auth_state(provider.clone(), Arc::new(MemoryAuditStore::new()));

        provider.fail_create(ProviderError::Rejected("Email already registered".to_string()));
        let (status, body) = call(app(state.clone()), Some("admin-aal2"), valid_body()).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Email already registered");

        provider.fail_create(ProviderError::Unavailable("service key not configured".to_string()));
        let (status, _) = call(app(state), Some("admin-aal2"), valid_body()).await?;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn audit_failure_does_not_fail_creation() -> Result<()> {
        let state = auth_state(provider(), Arc::new(ReadOnlyAuditStore));
        let (status, _) = call(app(state), Some("admin-aal2"), valid_body()).await?;
        assert_eq!(status, StatusCode::OK);
        Ok(())
    }
}
