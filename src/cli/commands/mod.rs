pub mod client;
pub mod logging;
pub mod server;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_IDENTITY_URL: &str = "identity-url";
pub const ARG_ANON_KEY: &str = "anon-key";
pub const ARG_API_URL: &str = "api-url";
pub const ARG_STATE_FILE: &str = "state-file";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("hrms")
        .about("HR administration: session policy, step-up and login rate limiting")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(ARG_IDENTITY_URL)
                .long("identity-url")
                .help("Identity provider base URL, example: https://project.supabase.co/auth/v1")
                .env("HRMS_IDENTITY_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_ANON_KEY)
                .long("anon-key")
                .help("Identity provider public (anon) key")
                .env("HRMS_ANON_KEY")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_API_URL)
                .long("api-url")
                .help("hrms API base URL used by the device commands")
                .env("HRMS_API_URL")
                .default_value("http://localhost:8080")
                .global(true),
        )
        .arg(
            Arg::new(ARG_STATE_FILE)
                .long("state-file")
                .help("JSON file holding the device session, step-up and lockout state")
                .env("HRMS_STATE_FILE")
                .default_value(".hrms-state.json")
                .global(true),
        )
        .subcommand(server::command());

    let command = client::with_subcommands(command);
    logging::with_args(command)
}
