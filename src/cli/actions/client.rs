//! Device-side commands. Each run opens the JSON state file, evaluates the stored session
//! once and exits; nothing keeps ticking between runs.

use crate::{
    api::handlers::auth::types::CreateUserRequest,
    cli::globals::GlobalArgs,
    client::{
        ApiClient, AuthEvent, AuthPolicy, ClientIdentity, Decision, GateState, JsonFileStore,
        KeyValueStore, LoginError, LoginFlow, LoginLockout, ProviderSession, RouteTable,
        StepUpFlow, StepUpTracker,
    },
    clock::{Clock, SystemClock},
    identity::GoTrueClient,
};
use anyhow::{Result, anyhow, bail};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::debug;

const CREATE_USER_ROUTE: &str = "/admin/users/new";
const AUDIT_LOGS_ROUTE: &str = "/audit-logs";

#[derive(Debug)]
pub enum Command {
    Login {
        email: String,
        password: SecretString,
    },
    OauthUrl {
        provider: String,
        redirect_to: String,
    },
    MfaEnroll,
    MfaVerify {
        code: String,
        factor_id: Option<String>,
    },
    Status {
        route: String,
    },
    Logout,
    CreateUser(CreateUserRequest),
    AuditLogs {
        search: Option<String>,
        category: Option<String>,
    },
}

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub command: Command,
}

struct Device {
    store: Arc<dyn KeyValueStore>,
    session: Arc<ProviderSession>,
    clock: Arc<dyn Clock>,
    api: ApiClient,
}

impl Device {
    fn open(globals: &GlobalArgs) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&globals.state_file));
        let provider = GoTrueClient::new(&globals.identity_url, globals.anon_key.clone())?;
        let session = Arc::new(ProviderSession::new(provider, store.clone()));
        debug!("Device state in {}", globals.state_file.display());

        Ok(Self {
            store,
            session,
            clock: Arc::new(SystemClock),
            api: ApiClient::new(&globals.api_url)?,
        })
    }

    fn identity(&self) -> Arc<dyn ClientIdentity> {
        self.session.clone()
    }

    fn policy(&self) -> AuthPolicy {
        AuthPolicy::new(self.identity(), self.store.clone(), self.clock.clone())
    }

    fn step_up(&self) -> StepUpFlow {
        StepUpFlow::new(
            self.identity(),
            StepUpTracker::new(self.store.clone()),
            self.clock.clone(),
        )
    }

    /// Evaluate the stored session and require `route` to render.
    async fn guard(&self, route: &str) -> Result<String> {
        let policy = self.policy();
        policy.boot().await;
        let decision = RouteTable::default().decide(&policy.snapshot(), route);
        if !decision.renders() {
            bail!("{}", describe(&decision));
        }

        self.session
            .current_session()
            .await?
            .map(|session| session.tokens.access_token)
            .ok_or_else(|| anyhow!("Not signed in. Run `hrms login` first."))
    }
}

/// Execute a device-side command.
/// # Errors
/// Returns an error if the command fails; the message is meant for the terminal.
pub async fn execute(args: Args) -> Result<()> {
    let device = Device::open(&args.globals)?;

    match args.command {
        Command::Login { email, password } => login(&device, &email, &password).await,
        Command::OauthUrl {
            provider,
            redirect_to,
        } => {
            let url = device.session.oauth_sign_in_url(&provider, &redirect_to)?;
            println!("{url}");
            Ok(())
        }
        Command::MfaEnroll => {
            let enrollment = device.step_up().enroll().await?;
            println!("Factor: {}", enrollment.factor_id);
            println!("URI:    {}", enrollment.uri);
            println!("Secret: {}", enrollment.secret.expose_secret());
            println!(
                "Add it to your authenticator app, then run `hrms mfa verify --factor-id {} --code <code>`",
                enrollment.factor_id
            );
            Ok(())
        }
        Command::MfaVerify { code, factor_id } => {
            let deadline = device.step_up().verify(factor_id.as_deref(), &code).await?;
            println!("Step-up verified. Next verification due after {deadline}.");
            Ok(())
        }
        Command::Status { route } => {
            let policy = device.policy();
            policy.boot().await;
            let snapshot = policy.snapshot();
            if let Some(identity) = &snapshot.identity {
                println!(
                    "Signed in as {} ({})",
                    identity.email.as_deref().unwrap_or(identity.id.as_str()),
                    identity.role
                );
            }
            let decision = RouteTable::default().decide(&snapshot, &route);
            println!("{route}: {}", describe(&decision));
            Ok(())
        }
        Command::Logout => {
            let policy = device.policy();
            policy.boot().await;
            device.session.sign_out().await?;
            policy.handle_event(&AuthEvent::SignedOut).await;
            println!("Signed out.");
            Ok(())
        }
        Command::CreateUser(request) => {
            let token = device.guard(CREATE_USER_ROUTE).await?;
            let user = device.api.create_user(&token, &request).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        Command::AuditLogs { search, category } => {
            let token = device.guard(AUDIT_LOGS_ROUTE).await?;
            let records = device
                .api
                .audit_logs(&token, search.as_deref(), category.as_deref())
                .await?;
            for record in &records {
                println!(
                    "{} {:<20} {:<30} {}",
                    record.timestamp.to_rfc3339(),
                    record.action,
                    record.actor_email.as_deref().unwrap_or("-"),
                    record.entity_type
                );
            }
            Ok(())
        }
    }
}

async fn login(device: &Device, email: &str, password: &SecretString) -> Result<()> {
    let flow = LoginFlow::new(
        device.api.clone(),
        device.identity(),
        LoginLockout::new(device.store.clone()),
        device.clock.clone(),
    );

    let user = match flow.login(email, password.expose_secret()).await {
        Ok(user) => user,
        Err(LoginError::LockedOut { remaining }) => {
            bail!(
                "Too many failed attempts. Try again in {}.",
                format_wait(remaining)
            )
        }
        Err(LoginError::Rejected {
            message,
            locked_for,
        }) if !locked_for.is_zero() => {
            bail!("{message} Locked for {}.", format_wait(locked_for))
        }
        Err(LoginError::Failed(detail)) => bail!("Login failed: {detail}"),
        Err(err) => return Err(err.into()),
    };

    // Opens the session window for this sign-in.
    let policy = device.policy();
    if let Some(session) = device.session.current_session().await? {
        policy.handle_event(&AuthEvent::SignedIn(session)).await;
    }

    println!(
        "Signed in as {} ({})",
        user.email.as_deref().unwrap_or(user.id.as_str()),
        user.role
    );
    if policy.snapshot().needs_step_up {
        println!("Step-up required: run `hrms mfa verify --code <code>`.");
    }
    Ok(())
}

fn describe(decision: &Decision) -> String {
    let state = match decision.state {
        GateState::Loading => "loading".to_string(),
        GateState::Unauthenticated {
            session_expired: true,
        } => "signed out, session expired".to_string(),
        GateState::Unauthenticated {
            session_expired: false,
        } => "signed out".to_string(),
        GateState::StepUpRequired => "step-up required".to_string(),
        GateState::Authorized(role) => format!("allowed for {role}"),
        GateState::Unauthorized(role) => format!("not allowed for {role}"),
    };

    match &decision.redirect {
        Some(redirect) if redirect.unauthorized => {
            format!("{state} (redirect to {}, unauthorized)", redirect.to)
        }
        Some(redirect) => format!("{state} (redirect to {})", redirect.to),
        None => state,
    }
}

fn format_wait(wait: Duration) -> String {
    let secs = wait.as_secs().max(1);
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
