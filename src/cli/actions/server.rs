use crate::{
    api::{self, AuthConfig, AuthState},
    audit::{AuditStore, MemoryAuditStore, PgAuditStore},
    clock::SystemClock,
    identity::GoTrueClient,
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub identity_url: String,
    pub anon_key: SecretString,
    pub service_key: Option<SecretString>,
    pub frontend_base_url: String,
    pub login_window_minutes: i64,
    pub login_max_failures: i64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone())
            .with_login_window_minutes(self.login_window_minutes)
            .with_login_max_failures(self.login_max_failures)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the audit store cannot be reached, the provider URL is invalid, or the
/// server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mut provider = GoTrueClient::new(&args.identity_url, args.anon_key.clone())?;
    match &args.service_key {
        Some(service_key) => provider = provider.with_service_key(service_key.clone()),
        None => warn!("No service key configured: account creation will be unavailable"),
    }
    debug!("Identity provider: {provider:?}");

    let audit: Arc<dyn AuditStore> = match &args.dsn {
        Some(dsn) => {
            let store = PgAuditStore::connect(dsn).await?;
            info!("Connected to audit store");
            Arc::new(store)
        }
        None => Arc::new(
            MemoryAuditStore::new().with_retention(args.auth_config().login_window()),
        ),
    };

    let auth_state = Arc::new(AuthState::new(
        args.auth_config(),
        Arc::new(provider),
        audit,
        Arc::new(SystemClock),
    ));

    api::new(args.port, auth_state).await
}
