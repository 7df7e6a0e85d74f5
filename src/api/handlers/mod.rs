//! API handlers for hrms.

pub mod audit_logs;
pub mod auth;
pub mod health;
