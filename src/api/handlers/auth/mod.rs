//! Auth handlers and supporting modules.
//!
//! ## Login ceiling
//!
//! `POST /login` counts `LOGIN_FAILED` audit events for the normalized email over the
//! trailing window (15 minutes by default). At 10 the provider is not called and the
//! request gets `429`. If the count cannot be read the request gets `503`.
//!
//! ## Privileged actions
//!
//! `POST /admin/create-user` requires a live bearer identity, assurance level `aal2` read
//! with the same token, and the `admin` role, in that order.

pub(crate) mod admin;
pub(crate) mod error;
pub(crate) mod login;
pub(crate) mod principal;
mod rate_limit;
mod state;
pub mod types;
mod utils;

pub use error::ApiError;
pub use rate_limit::RateLimitDecision;
pub use state::{AuthConfig, AuthState, MAX_LOGIN_WINDOW_MINUTES};

#[cfg(test)]
pub(crate) mod test_support;
