//! Device-side sign-in against the rate-limited `POST /login` endpoint.
//!
//! The local lockout is checked before any request is sent. A credential rejection (`401`)
//! or a server-side ceiling (`429`) counts as a local failure. Outages, malformed requests
//! and transport errors do not. A successful login hands the returned tokens to the provider
//! client and clears the local lockout.

use super::{lockout::LoginLockout, provider::ClientIdentity, store::StoreError};
use crate::{
    api::handlers::auth::types::{CreateUserRequest, CreateUserResponse, ErrorResponse},
    audit::AuditRecord,
    clock::Clock,
    identity::{Identity, ProviderError, SignedIn},
};
use anyhow::Context;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const LOCKED_OUT_MESSAGE: &str = "Too many failed attempts. Please wait a bit and try again.";
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed.";
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password.";

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("{message}")]
    Status { status: StatusCode, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// HTTP client for the hrms server endpoints.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut parsed =
            Url::parse(base_url).with_context(|| format!("Invalid server URL: {base_url}"))?;
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build server HTTP client")?;
        Ok(Self {
            base_url: parsed,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiClientError> {
        self.base_url
            .join(path)
            .map_err(|err| ApiClientError::Transport(format!("invalid endpoint {path}: {err}")))
    }

    /// # Errors
    /// `Status` when the server rejects the attempt, `Transport` when it cannot be reached.
    #[instrument(skip_all)]
    pub async fn login(&self, email: &str, password: &str) -> Result<SignedIn, ApiClientError> {
        let request = self
            .http
            .post(self.endpoint("login")?)
            .json(&json!({ "email": email, "password": password }));
        send(request).await
    }

    /// # Errors
    /// `Status` with 401/403/400 when a gate refuses the call.
    #[instrument(skip_all)]
    pub async fn create_user(
        &self,
        access_token: &str,
        request: &CreateUserRequest,
    ) -> Result<Identity, ApiClientError> {
        let request = self
            .http
            .post(self.endpoint("admin/create-user")?)
            .bearer_auth(access_token)
            .json(request);
        let response: CreateUserResponse = send(request).await?;
        Ok(response.user)
    }

    /// # Errors
    /// `Status` with 401/403 when the caller may not read the trail.
    #[instrument(skip_all)]
    pub async fn audit_logs(
        &self,
        access_token: &str,
        search: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<AuditRecord>, ApiClientError> {
        let mut url = self.endpoint("audit-logs")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(search) = search {
                query.append_pair("search", search);
            }
            if let Some(category) = category {
                query.append_pair("category", category);
            }
        }
        send(self.http.get(url).bearer_auth(access_token)).await
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiClientError> {
    let response = request
        .send()
        .await
        .map_err(|err| ApiClientError::Transport(err.to_string()))?;
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ApiClientError::Transport(err.to_string()))?;

    if status.is_success() {
        serde_json::from_slice(&bytes).map_err(|err| ApiClientError::InvalidResponse(err.to_string()))
    } else {
        let message = serde_json::from_slice::<ErrorResponse>(&bytes)
            .map(|body| body.error)
            .ok()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| fallback_message(status));
        Err(ApiClientError::Status { status, message })
    }
}

fn fallback_message(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED => INVALID_CREDENTIALS_MESSAGE.to_string(),
        StatusCode::TOO_MANY_REQUESTS => LOCKED_OUT_MESSAGE.to_string(),
        _ => status
            .canonical_reason()
            .map_or_else(|| format!("HTTP {status}"), str::to_string),
    }
}

/// Statuses that mean the credentials were checked and refused.
fn counts_as_failure(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::TOO_MANY_REQUESTS)
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Too many failed attempts. Please wait a bit and try again.")]
    LockedOut { remaining: Duration },
    /// The server refused the attempt. `locked_for` is the local lock that now applies.
    #[error("{message}")]
    Rejected {
        message: String,
        locked_for: Duration,
    },
    #[error("Login failed.")]
    Failed(String),
    #[error("Failed to adopt session: {0}")]
    Adopt(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct LoginFlow {
    api: ApiClient,
    provider: Arc<dyn ClientIdentity>,
    lockout: LoginLockout,
    clock: Arc<dyn Clock>,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        api: ApiClient,
        provider: Arc<dyn ClientIdentity>,
        lockout: LoginLockout,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            provider,
            lockout,
            clock,
        }
    }

    #[must_use]
    pub fn lockout(&self) -> &LoginLockout {
        &self.lockout
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    /// `LockedOut` without contacting the server while a local lock applies, `Rejected`
    /// when the server refuses the credentials or applies its ceiling, `Failed` for any
    /// other status or when the server cannot be reached.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, LoginError> {
        let email = email.trim();
        let remaining = self.lockout.remaining_lock(email, self.clock.now()).await?;
        if !remaining.is_zero() {
            debug!("Login blocked locally for {}s", remaining.as_secs());
            return Err(LoginError::LockedOut { remaining });
        }

        let signed_in = match self.api.login(email, password).await {
            Ok(signed_in) => signed_in,
            Err(ApiClientError::Status { status, message }) if counts_as_failure(status) => {
                let now = self.clock.now();
                self.lockout.register_failure(email, now).await?;
                let locked_for = self.lockout.remaining_lock(email, now).await?;
                warn!("Login rejected with {status}");
                return Err(LoginError::Rejected {
                    message,
                    locked_for,
                });
            }
            Err(err) => {
                warn!("Login not checked: {err}");
                return Err(LoginError::Failed(err.to_string()));
            }
        };

        let user = signed_in.user.clone();
        self.provider.adopt_session(signed_in).await?;
        self.lockout.reset_failures(email).await?;
        info!("Signed in as {}", user.id);
        Ok(user)
    }

    /// URL that starts an OAuth sign-in and returns to `redirect_to`.
    ///
    /// # Errors
    /// Returns `ProviderError` if the URL cannot be built.
    pub fn oauth_url(&self, provider: &str, redirect_to: &str) -> Result<Url, ProviderError> {
        self.provider.oauth_sign_in_url(provider, redirect_to)
    }
}
