//! Rate-limited password login.
//!
//! Flow Overview:
//! 1) Validate the payload and normalize the email.
//! 2) Count trailing `LOGIN_FAILED` events for that email; refuse at the ceiling without
//!    calling the provider. An unreadable count refuses too.
//! 3) Forward the credentials to the provider and record the outcome (best effort).

use super::{
    error::ApiError,
    rate_limit::{RateLimitDecision, check_login},
    state::AuthState,
    types::{ErrorResponse, LoginRequest, LoginResponse},
    utils::{extract_client_ip, normalize_email, required},
};
use crate::{
    audit::{AuditAction, NewAuditEvent, record_best_effort},
    identity::ProviderError,
};
use axum::{
    extract::{Extension, Json},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 400, description = "Missing email or password", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Too many recent failures for this email", body = ErrorResponse),
        (status = 503, description = "Failure count or provider unavailable", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    match login_inner(&headers, &auth_state, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn login_inner(
    headers: &HeaderMap,
    auth_state: &AuthState,
    request: LoginRequest,
) -> Result<LoginResponse, ApiError> {
    let (Some(email), Some(password)) = (
        required(request.email.as_deref()),
        required(request.password.as_deref()),
    ) else {
        return Err(ApiError::Validation("Missing email or password".to_string()));
    };
    let email = normalize_email(email);
    let ip_address = extract_client_ip(headers);
    let now = auth_state.clock().now();

    match check_login(auth_state.audit(), auth_state.config(), &email, now).await {
        Ok(RateLimitDecision::Allowed) => {}
        Ok(RateLimitDecision::Limited) => {
            warn!("Login ceiling reached, refusing attempt");
            return Err(ApiError::RateLimited(
                "Too many failed attempts. Please wait and try again.".to_string(),
            ));
        }
        Err(err) => {
            error!("Failed to read login failure count: {err}");
            return Err(ApiError::Unavailable(
                "Login temporarily unavailable".to_string(),
            ));
        }
    }

    match auth_state
        .provider()
        .sign_in_with_password(&email, password)
        .await
    {
        Ok(signed_in) => {
            record_best_effort(
                auth_state.audit(),
                NewAuditEvent::auth(AuditAction::LoginSuccess, auth_state.clock().now())
                    .with_actor(Some(&signed_in.user.id), Some(&email))
                    .with_entity("Auth", Some(&signed_in.user.id))
                    .with_ip(ip_address),
            )
            .await;
            info!("Login succeeded for {}", signed_in.user.id);
            Ok(LoginResponse {
                session: signed_in.session,
                user: signed_in.user,
            })
        }
        Err(
            ProviderError::InvalidCredentials
            | ProviderError::Unauthorized
            | ProviderError::Rejected(_),
        ) => {
            record_best_effort(
                auth_state.audit(),
                NewAuditEvent::auth(AuditAction::LoginFailed, auth_state.clock().now())
                    .with_actor(None, Some(&email))
                    .with_ip(ip_address),
            )
            .await;
            Err(ApiError::Unauthenticated(
                "Invalid email or password.".to_string(),
            ))
        }
        Err(err) => {
            error!("Identity provider sign-in failed: {err}");
            Err(ApiError::Unavailable(
                "Login temporarily unavailable".to_string(),
            ))
        }
    }
}
