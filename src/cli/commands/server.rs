use crate::api::handlers::auth::MAX_LOGIN_WINDOW_MINUTES;
use clap::{Arg, Command};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_SERVICE_KEY: &str = "service-key";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_LOGIN_WINDOW_MINUTES: &str = "login-window-minutes";
pub const ARG_LOGIN_MAX_FAILURES: &str = "login-max-failures";

/// `hrms server`: the login, admin and audit API.
#[must_use]
pub fn command() -> Command {
    Command::new("server")
        .about("Run the HTTP API")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("HRMS_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Audit store connection string")
                .long_help(
                    "PostgreSQL connection string for the audit trail. Without it records are kept in memory and the login ceiling only holds for this process.",
                )
                .env("HRMS_DSN"),
        )
        .arg(
            Arg::new(ARG_SERVICE_KEY)
                .long("service-key")
                .help("Identity provider service key, required to create accounts")
                .env("HRMS_SERVICE_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long("frontend-base-url")
                .help("Frontend base URL allowed by CORS")
                .env("HRMS_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_LOGIN_WINDOW_MINUTES)
                .long("login-window-minutes")
                .help("Trailing window, in minutes, for counting failed logins (at most one week)")
                .env("HRMS_LOGIN_WINDOW_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LOGIN_WINDOW_MINUTES)),
        )
        .arg(
            Arg::new(ARG_LOGIN_MAX_FAILURES)
                .long("login-max-failures")
                .help("Failed logins within the window before login is refused")
                .env("HRMS_LOGIN_MAX_FAILURES")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}
