//! Maps validated CLI matches to an [`Action`].

use crate::api::handlers::auth::types::CreateUserRequest;
use crate::cli::{
    actions::{Action, client, server},
    commands::{self, client as client_args, server as server_args},
    globals::GlobalArgs,
};
use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;
use std::path::PathBuf;

fn string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    string(matches, id).with_context(|| format!("missing required argument: --{id}"))
}

fn globals(matches: &ArgMatches) -> Result<GlobalArgs> {
    let identity_url = required(matches, commands::ARG_IDENTITY_URL)?;
    let anon_key = required(matches, commands::ARG_ANON_KEY)?;

    let mut globals = GlobalArgs::new(identity_url, SecretString::from(anon_key));
    if let Some(api_url) = string(matches, commands::ARG_API_URL) {
        globals = globals.with_api_url(api_url);
    }
    if let Some(state_file) = string(matches, commands::ARG_STATE_FILE) {
        globals = globals.with_state_file(PathBuf::from(state_file));
    }
    Ok(globals)
}

fn server_action(matches: &ArgMatches, globals: GlobalArgs) -> Result<Action> {
    Ok(Action::Server(server::Args {
        port: matches
            .get_one::<u16>(server_args::ARG_PORT)
            .copied()
            .unwrap_or(8080),
        dsn: string(matches, server_args::ARG_DSN).map(SecretString::from),
        identity_url: globals.identity_url,
        anon_key: globals.anon_key,
        service_key: string(matches, server_args::ARG_SERVICE_KEY).map(SecretString::from),
        frontend_base_url: required(matches, server_args::ARG_FRONTEND_BASE_URL)?,
        login_window_minutes: matches
            .get_one::<i64>(server_args::ARG_LOGIN_WINDOW_MINUTES)
            .copied()
            .unwrap_or(15),
        login_max_failures: matches
            .get_one::<i64>(server_args::ARG_LOGIN_MAX_FAILURES)
            .copied()
            .unwrap_or(10),
    }))
}

fn client_command(name: &str, matches: &ArgMatches) -> Result<client::Command> {
    let command = match name {
        "login" => client::Command::Login {
            email: required(matches, client_args::ARG_EMAIL)?,
            password: SecretString::from(required(matches, client_args::ARG_PASSWORD)?),
        },
        "oauth-url" => client::Command::OauthUrl {
            provider: required(matches, client_args::ARG_OAUTH_PROVIDER)?,
            redirect_to: required(matches, client_args::ARG_REDIRECT_TO)?,
        },
        "mfa" => match matches.subcommand() {
            Some(("enroll", _)) => client::Command::MfaEnroll,
            Some(("verify", verify)) => client::Command::MfaVerify {
                code: required(verify, client_args::ARG_CODE)?,
                factor_id: string(verify, client_args::ARG_FACTOR_ID),
            },
            _ => return Err(anyhow!("missing mfa subcommand: enroll or verify")),
        },
        "status" => client::Command::Status {
            route: string(matches, client_args::ARG_ROUTE).unwrap_or_else(|| "/".to_string()),
        },
        "logout" => client::Command::Logout,
        "create-user" => client::Command::CreateUser(CreateUserRequest {
            email: string(matches, client_args::ARG_EMAIL),
            password: string(matches, client_args::ARG_PASSWORD),
            name: string(matches, client_args::ARG_NAME),
            role: string(matches, client_args::ARG_ROLE),
        }),
        "audit-logs" => client::Command::AuditLogs {
            search: string(matches, client_args::ARG_SEARCH),
            category: string(matches, client_args::ARG_CATEGORY),
        },
        other => return Err(anyhow!("unknown command: {other}")),
    };
    Ok(command)
}

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let (name, sub_matches) = matches.subcommand().context("missing command")?;
    let globals = globals(matches)?;

    if name == "server" {
        return server_action(sub_matches, globals);
    }

    Ok(Action::Client(client::Args {
        globals,
        command: client_command(name, sub_matches)?,
    }))
}
