//! HTTP client for a GoTrue-compatible identity provider.
//!
//! Flow Overview:
//! - User-scoped calls send the public (anon) key plus the caller's bearer token.
//! - Privileged calls (`admin/users`) send the service key and are refused locally when
//!   no service key is configured.
//! - The assurance level is the `aal` claim of an access token that the provider has just
//!   confirmed is live.
//!
//! Keys and tokens are never logged.

use super::{
    AssuranceLevel, Factor, Identity, IdentityProvider, NewAccount, ProviderError, Role,
    SessionTokens, SignedIn, TotpEnrollment,
};
use anyhow::Context;
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::{fmt, time::Duration};
use tracing::{debug, instrument};
use url::Url;

const APIKEY_HEADER: &str = "apikey";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct GoTrueClient {
    base_url: Url,
    anon_key: SecretString,
    service_key: Option<SecretString>,
    http: Client,
}

impl fmt::Debug for GoTrueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoTrueClient")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"***")
            .field("service_key", &self.service_key.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl GoTrueClient {
    /// Build a client for the provider rooted at `base_url` (e.g. `https://id.tld/auth/v1`).
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, anon_key: SecretString) -> anyhow::Result<Self> {
        let mut parsed = Url::parse(base_url)
            .with_context(|| format!("Invalid identity provider URL: {base_url}"))?;
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build identity provider HTTP client")?;

        Ok(Self {
            base_url: parsed,
            anon_key,
            service_key: None,
            http,
        })
    }

    #[must_use]
    pub fn with_service_key(mut self, service_key: SecretString) -> Self {
        self.service_key = Some(service_key);
        self
    }

    #[must_use]
    pub fn has_service_key(&self) -> bool {
        self.service_key.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|err| ProviderError::Unavailable(format!("invalid endpoint {path}: {err}")))
    }

    fn public(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(APIKEY_HEADER, self.anon_key.expose_secret())
    }

    fn user_scoped(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        self.public(request).bearer_auth(access_token)
    }

    /// Revoke the session behind `access_token`.
    ///
    /// # Errors
    /// Returns `ProviderError` if the provider is unreachable or rejects the call.
    #[instrument(skip_all)]
    pub async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let request = self.user_scoped(self.http.post(self.endpoint("logout")?), access_token);
        let (status, body) = send(request).await?;
        // An already-dead token is signed out as far as the caller is concerned.
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(status_error(status, &body))
        }
    }

    /// Exchange a refresh token for a new session.
    ///
    /// # Errors
    /// Returns `ProviderError::Unauthorized` if the refresh token is no longer valid.
    #[instrument(skip_all)]
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<SignedIn, ProviderError> {
        let request = self
            .public(self.http.post(self.endpoint("token?grant_type=refresh_token")?))
            .json(&json!({ "refresh_token": refresh_token }));
        let (status, body) = send(request).await?;
        if status.is_success() {
            parse_signed_in(&body)
        } else if status.is_client_error() {
            Err(ProviderError::Unauthorized)
        } else {
            Err(status_error(status, &body))
        }
    }

    /// List the second factors enrolled for the caller.
    ///
    /// # Errors
    /// Returns `ProviderError` if the token is not live or the provider is unreachable.
    #[instrument(skip_all)]
    pub async fn list_factors(&self, access_token: &str) -> Result<Vec<Factor>, ProviderError> {
        let body = self.fetch_user(access_token).await?;
        let factors = body
            .get("factors")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|factor| serde_json::from_value(factor.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(factors)
    }

    /// Enroll a new TOTP factor.
    ///
    /// # Errors
    /// Returns `ProviderError` if the provider rejects the enrollment.
    #[instrument(skip_all)]
    pub async fn enroll_totp(&self, access_token: &str) -> Result<TotpEnrollment, ProviderError> {
        let request = self
            .user_scoped(self.http.post(self.endpoint("factors")?), access_token)
            .json(&json!({ "factor_type": "totp" }));
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let field = |pointer: &str| {
            body.pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ProviderError::InvalidResponse(format!("missing {pointer}")))
        };

        Ok(TotpEnrollment {
            factor_id: field("/id")?,
            qr_code: field("/totp/qr_code")?,
            secret: SecretString::from(field("/totp/secret")?),
            uri: field("/totp/uri").unwrap_or_default(),
        })
    }

    /// Issue a challenge for an enrolled factor and return its id.
    ///
    /// # Errors
    /// Returns `ProviderError` if the factor is unknown or the provider is unreachable.
    #[instrument(skip(self, access_token))]
    pub async fn challenge_factor(
        &self,
        access_token: &str,
        factor_id: &str,
    ) -> Result<String, ProviderError> {
        let path = format!("factors/{factor_id}/challenge");
        let request = self.user_scoped(self.http.post(self.endpoint(&path)?), access_token);
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("missing challenge id".to_string()))
    }

    /// Answer a challenge. On success the provider issues an `aal2` session.
    ///
    /// # Errors
    /// Returns `ProviderError::Rejected` for a wrong code.
    #[instrument(skip(self, access_token, code))]
    pub async fn verify_factor(
        &self,
        access_token: &str,
        factor_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> Result<SignedIn, ProviderError> {
        let path = format!("factors/{factor_id}/verify");
        let request = self
            .user_scoped(self.http.post(self.endpoint(&path)?), access_token)
            .json(&json!({ "challenge_id": challenge_id, "code": code }));
        let (status, body) = send(request).await?;
        if status.is_success() {
            parse_signed_in(&body)
        } else {
            Err(status_error(status, &body))
        }
    }

    /// Build the URL that starts an OAuth sign-in with `provider`.
    ///
    /// # Errors
    /// Returns `ProviderError::Unavailable` if the URL cannot be built.
    pub fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to);
        Ok(url)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Value, ProviderError> {
        let request = self.user_scoped(self.http.get(self.endpoint("user")?), access_token);
        let (status, body) = send(request).await?;
        if status.is_success() {
            Ok(body)
        } else if status.is_client_error() {
            Err(ProviderError::Unauthorized)
        } else {
            Err(status_error(status, &body))
        }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    #[instrument(skip_all)]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, ProviderError> {
        let request = self
            .public(self.http.post(self.endpoint("token?grant_type=password")?))
            .json(&json!({ "email": email, "password": password }));
        let (status, body) = send(request).await?;
        if status.is_success() {
            parse_signed_in(&body)
        } else if status.is_client_error() {
            debug!("Password sign-in rejected: {status}");
            Err(ProviderError::InvalidCredentials)
        } else {
            Err(status_error(status, &body))
        }
    }

    #[instrument(skip_all)]
    async fn get_user(&self, access_token: &str) -> Result<Identity, ProviderError> {
        let body = self.fetch_user(access_token).await?;
        parse_user(&body)
    }

    #[instrument(skip_all)]
    async fn assurance_level(&self, access_token: &str) -> Result<AssuranceLevel, ProviderError> {
        // The claim is only trusted once the provider confirms the token is live.
        self.fetch_user(access_token).await?;
        assurance_from_token(access_token)
    }

    #[instrument(skip_all)]
    async fn admin_create_account(&self, account: &NewAccount) -> Result<Identity, ProviderError> {
        let Some(service_key) = &self.service_key else {
            return Err(ProviderError::Unavailable(
                "service key not configured".to_string(),
            ));
        };

        let request = self
            .http
            .post(self.endpoint("admin/users")?)
            .header(APIKEY_HEADER, service_key.expose_secret())
            .bearer_auth(service_key.expose_secret())
            .json(&json!({
                "email": account.email,
                "password": account.password.expose_secret(),
                "email_confirm": true,
                "user_metadata": {
                    "name": account.name,
                    "role": account.role.as_str(),
                },
            }));
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        parse_user(body.get("user").unwrap_or(&body))
    }
}

async fn send(request: RequestBuilder) -> Result<(StatusCode, Value), ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
    // Empty (204) and non-JSON bodies decode as null.
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

fn error_message(body: &Value) -> String {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .unwrap_or("request rejected")
        .to_string()
}

fn status_error(status: StatusCode, body: &Value) -> ProviderError {
    if status.is_server_error() {
        ProviderError::Unavailable(format!("{status}: {}", error_message(body)))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ProviderError::Unauthorized
    } else {
        ProviderError::Rejected(error_message(body))
    }
}

/// Parse a provider user object, resolving the role claim once.
pub(crate) fn parse_user(value: &Value) -> Result<Identity, ProviderError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("missing user id".to_string()))?;
    let metadata = value.get("user_metadata");
    let metadata_str = |key: &str| metadata.and_then(|m| m.get(key)).and_then(Value::as_str);

    Ok(Identity {
        id: id.to_string(),
        email: value
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string),
        name: metadata_str("name").map(str::to_string),
        role: Role::from_claim(metadata_str("role")),
    })
}

fn parse_signed_in(value: &Value) -> Result<SignedIn, ProviderError> {
    let token = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("missing {key}")))
    };
    let user = value
        .get("user")
        .ok_or_else(|| ProviderError::InvalidResponse("missing user".to_string()))?;

    Ok(SignedIn {
        session: SessionTokens {
            access_token: token("access_token")?,
            refresh_token: token("refresh_token")?,
        },
        user: parse_user(user)?,
    })
}

/// Read the `aal` claim from a JWT access token. Tokens without the claim are `aal1`.
pub(crate) fn assurance_from_token(token: &str) -> Result<AssuranceLevel, ProviderError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ProviderError::InvalidResponse("malformed access token".to_string()))?;
    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
        .map_err(|_| ProviderError::InvalidResponse("malformed token payload".to_string()))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|_| ProviderError::InvalidResponse("malformed token claims".to_string()))?;

    match claims.get("aal").and_then(Value::as_str) {
        Some(level) => level.parse(),
        None => Ok(AssuranceLevel::Aal1),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use std::net::TcpListener;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    /// Unsigned JWT carrying the given `aal` claim.
    pub(crate) fn token_with_aal(aal: &str) -> String {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = json!({ "sub": "user-1", "aal": aal }).to_string();
        let claims = Base64UrlUnpadded::encode_string(claims.as_bytes());
        format!("{header}.{claims}.signature")
    }

    fn client(server: &MockServer) -> GoTrueClient {
        GoTrueClient::new(
            &format!("{}/auth/v1", server.uri()),
            SecretString::from("anon-key"),
        )
        .unwrap()
    }

    fn user_json(role: &str) -> Value {
        json!({
            "id": "8a7c1f1e-0000-4000-8000-000000000001",
            "email": "alice@example.com",
            "user_metadata": { "name": "Alice", "role": role }
        })
    }

    #[test]
    fn base_url_gets_trailing_slash() -> Result<()> {
        let client = GoTrueClient::new("https://id.example.com/auth/v1", SecretString::from("k"))?;
        let url = client.endpoint("token?grant_type=password")?;
        assert_eq!(
            url.as_str(),
            "https://id.example.com/auth/v1/token?grant_type=password"
        );
        Ok(())
    }

    #[test]
    fn debug_redacts_keys() -> Result<()> {
        let client = GoTrueClient::new("https://id.example.com/auth/v1", SecretString::from("k1"))?
            .with_service_key(SecretString::from("k2"));
        let debug = format!("{client:?}");
        assert!(!debug.contains("k1"));
        assert!(!debug.contains("k2"));
        Ok(())
    }

    #[test]
    fn assurance_from_token_reads_claim() {
        assert_eq!(
            assurance_from_token(&token_with_aal("aal2")),
            Ok(AssuranceLevel::Aal2)
        );
        assert_eq!(
            assurance_from_token(&token_with_aal("aal1")),
            Ok(AssuranceLevel::Aal1)
        );
        assert!(assurance_from_token("not-a-jwt").is_err());
    }

    #[test]
    fn parse_user_defaults_unknown_role() -> Result<()> {
        let identity = parse_user(&user_json("owner"))?;
        assert_eq!(identity.role, Role::Employee);
        assert_eq!(identity.name.as_deref(), Some("Alice"));

        let identity = parse_user(&json!({ "id": "u2" }))?;
        assert_eq!(identity.role, Role::Employee);
        assert_eq!(identity.email, None);
        Ok(())
    }

    #[test]
    fn authorize_url_carries_provider_and_redirect() -> Result<()> {
        let client = GoTrueClient::new("https://id.example.com/auth/v1/", SecretString::from("k"))?;
        let url = client.authorize_url("google", "https://hr.example.com")?;
        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("provider".to_string(), "google".to_string())));
        assert!(pairs.contains(&(
            "redirect_to".to_string(),
            "https://hr.example.com".to_string()
        )));
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_parses_session() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "user": user_json("hr"),
            })))
            .mount(&server)
            .await;

        let signed_in = client(&server)
            .sign_in_with_password("alice@example.com", "pw")
            .await?;
        assert_eq!(signed_in.session.access_token, "access");
        assert_eq!(signed_in.session.refresh_token, "refresh");
        assert_eq!(signed_in.user.role, Role::Hr);
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_rejects_bad_credentials() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .sign_in_with_password("alice@example.com", "wrong")
            .await;
        assert_eq!(result, Err(ProviderError::InvalidCredentials));
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_maps_server_errors_to_unavailable() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server)
            .sign_in_with_password("alice@example.com", "pw")
            .await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
        Ok(())
    }

    #[tokio::test]
    async fn get_user_rejects_dead_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "msg": "invalid JWT"
            })))
            .mount(&server)
            .await;

        let result = client(&server).get_user("expired").await;
        assert_eq!(result, Err(ProviderError::Unauthorized));
        Ok(())
    }

    #[tokio::test]
    async fn assurance_level_requires_live_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let token = token_with_aal("aal2");
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", format!("Bearer {token}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("admin")))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.assurance_level(&token).await, Ok(AssuranceLevel::Aal2));

        // Any other token is rejected by the mock with 404.
        let other = token_with_aal("aal2").replace("signature", "forged");
        assert!(client.assurance_level(&other).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn admin_create_requires_service_key() -> Result<()> {
        let client = GoTrueClient::new("http://127.0.0.1:9/auth/v1", SecretString::from("anon"))?;
        let account = NewAccount {
            email: "new@example.com".to_string(),
            password: SecretString::from("pw"),
            name: "New".to_string(),
            role: Role::Employee,
        };
        let result = client.admin_create_account(&account).await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
        Ok(())
    }

    #[tokio::test]
    async fn admin_create_preconfirms_account() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/admin/users"))
            .and(header("apikey", "service-key"))
            .and(body_partial_json(json!({
                "email": "new@example.com",
                "email_confirm": true,
                "user_metadata": { "role": "payroll" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "new-id",
                "email": "new@example.com",
                "user_metadata": { "name": "New", "role": "payroll" }
            })))
            .mount(&server)
            .await;

        let client = client(&server).with_service_key(SecretString::from("service-key"));
        let account = NewAccount {
            email: "new@example.com".to_string(),
            password: SecretString::from("pw"),
            name: "New".to_string(),
            role: Role::Payroll,
        };
        let created = client.admin_create_account(&account).await?;
        assert_eq!(created.id, "new-id");
        assert_eq!(created.role, Role::Payroll);
        Ok(())
    }

    #[tokio::test]
    async fn list_factors_reads_user_factors() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let mut user = user_json("hr");
        user["factors"] = json!([
            { "id": "f1", "factor_type": "totp", "status": "verified" },
            { "id": "f2", "factor_type": "phone", "status": "unverified" }
        ]);
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user))
            .mount(&server)
            .await;

        let factors = client(&server).list_factors("token").await?;
        assert_eq!(factors.len(), 2);
        assert!(factors[0].is_verified_totp());
        assert!(!factors[1].is_verified_totp());
        Ok(())
    }

    #[tokio::test]
    async fn verify_factor_rejects_wrong_code() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/factors/f1/verify"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "msg": "Invalid TOTP code entered"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .verify_factor("token", "f1", "c1", "000000")
            .await;
        assert_eq!(
            result,
            Err(ProviderError::Rejected(
                "Invalid TOTP code entered".to_string()
            ))
        );
        Ok(())
    }
}
