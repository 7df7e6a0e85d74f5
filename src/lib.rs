//! # hrms (session, step-up and login rate limiting policy)
//!
//! `hrms` holds the security core of the HR administration tool. Business pages are
//! plain CRUD views over the managed database; everything here is about deciding whether
//! a caller may see them.
//!
//! ## Two trust boundaries
//!
//! - **Device-local** (`client`): a 7-day session window, a 7-day step-up (MFA)
//!   re-verification deadline and an escalating login lockout, persisted in an injected
//!   key-value store. The lockout only throttles the UI.
//! - **Server-side** (`api`): `POST /login` counts trailing `LOGIN_FAILED` events in the
//!   audit trail and refuses to call the identity provider once the ceiling is reached;
//!   `POST /admin/create-user` requires a live session, assurance level `aal2` and the
//!   `admin` role.
//!
//! ## Fail closed
//!
//! An unreadable failure counter blocks the login attempt (`503`), and an unreadable
//! assurance level means step-up is required. Audit writes are best effort: they never
//! change the outcome of the request that produced them.
//!
//! ## Known limits
//!
//! Server instances share no memory. Two concurrent logins for the same email can both see
//! a count below the ceiling, so the ceiling is soft. The window query filters by actor
//! email only, so rotating target emails is not limited per source address.

pub mod api;
pub mod audit;
pub mod cli;
pub mod client;
pub mod clock;
pub mod identity;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
