//! Device-side subcommands. They share the state file and provider settings from the
//! top-level command.

use clap::{Arg, Command};

pub const ARG_EMAIL: &str = "email";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_NAME: &str = "name";
pub const ARG_ROLE: &str = "role";
pub const ARG_CODE: &str = "code";
pub const ARG_FACTOR_ID: &str = "factor-id";
pub const ARG_ROUTE: &str = "route";
pub const ARG_SEARCH: &str = "search";
pub const ARG_CATEGORY: &str = "category";
pub const ARG_OAUTH_PROVIDER: &str = "provider";
pub const ARG_REDIRECT_TO: &str = "redirect-to";

#[must_use]
pub fn with_subcommands(command: Command) -> Command {
    command
        .subcommand(login())
        .subcommand(oauth_url())
        .subcommand(mfa())
        .subcommand(
            Command::new("status")
                .about("Show the gate decision for a route")
                .arg(
                    Arg::new(ARG_ROUTE)
                        .long("route")
                        .help("Route to check")
                        .default_value("/"),
                ),
        )
        .subcommand(Command::new("logout").about("Sign out and forget the stored session"))
        .subcommand(create_user())
        .subcommand(audit_logs())
}

fn login() -> Command {
    Command::new("login")
        .about("Sign in with email and password")
        .arg(
            Arg::new(ARG_EMAIL)
                .short('e')
                .long("email")
                .help("Account email")
                .env("HRMS_EMAIL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long("password")
                .help("Account password")
                .env("HRMS_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}

fn oauth_url() -> Command {
    Command::new("oauth-url")
        .about("Print the URL that starts an OAuth sign-in")
        .arg(
            Arg::new(ARG_OAUTH_PROVIDER)
                .long("provider")
                .help("OAuth provider name")
                .default_value("google"),
        )
        .arg(
            Arg::new(ARG_REDIRECT_TO)
                .long("redirect-to")
                .help("Where the provider sends the browser afterwards")
                .env("HRMS_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
}

fn mfa() -> Command {
    Command::new("mfa")
        .about("Enroll or verify the step-up factor")
        .subcommand_required(true)
        .subcommand(Command::new("enroll").about("Enroll a new TOTP factor"))
        .subcommand(
            Command::new("verify")
                .about("Answer a TOTP challenge")
                .arg(
                    Arg::new(ARG_CODE)
                        .short('c')
                        .long("code")
                        .help("6-digit code from the authenticator app")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_FACTOR_ID)
                        .long("factor-id")
                        .help("Factor to challenge (default: first verified TOTP factor)"),
                ),
        )
}

fn create_user() -> Command {
    Command::new("create-user")
        .about("Create an account (admin, step-up verified)")
        .arg(
            Arg::new(ARG_EMAIL)
                .short('e')
                .long("email")
                .help("New account email")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long("password")
                .help("Initial password")
                .required(true),
        )
        .arg(Arg::new(ARG_NAME).long("name").help("Display name"))
        .arg(
            Arg::new(ARG_ROLE)
                .long("role")
                .help("admin, hr, payroll, security or employee (default: employee)"),
        )
}

fn audit_logs() -> Command {
    Command::new("audit-logs")
        .about("List the most recent audit records")
        .arg(
            Arg::new(ARG_SEARCH)
                .short('s')
                .long("search")
                .help("Case-insensitive match on action, actor email or entity type"),
        )
        .arg(
            Arg::new(ARG_CATEGORY)
                .long("category")
                .help("Exact category, or 'all'"),
        )
}
