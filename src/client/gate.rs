//! Route guards.
//!
//! [`RouteTable::decide`] folds the policy snapshot and the requested route into a
//! [`GateState`] and, where the route must not render, a [`Redirect`]. Protected content
//! renders only in [`GateState::Authorized`].

use super::policy::AuthSnapshot;
use crate::identity::Role;
use std::collections::BTreeMap;

pub const LOGIN_ROUTE: &str = "/login";
pub const STEP_UP_ROUTE: &str = "/mfa";
pub const DEFAULT_ROUTE: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Initial state until the policy has evaluated the stored session.
    Loading,
    Unauthenticated { session_expired: bool },
    StepUpRequired,
    Authorized(Role),
    Unauthorized(Role),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: &'static str,
    /// Route the caller asked for, to return to afterwards.
    pub from: String,
    /// Set when the identity lacks the role for `from`.
    pub unauthorized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub state: GateState,
    pub redirect: Option<Redirect>,
}

impl Decision {
    /// Whether the requested route may render.
    #[must_use]
    pub fn renders(&self) -> bool {
        self.redirect.is_none() && self.state != GateState::Loading
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Access {
    Public,
    Authenticated,
    Roles(Vec<Role>),
}

static AUTHENTICATED: Access = Access::Authenticated;

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: BTreeMap<String, Access>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
            .public(LOGIN_ROUTE)
            .public(STEP_UP_ROUTE)
            .restricted("/admin/users/new", &[Role::Admin])
            .restricted("/payroll", &[Role::Admin, Role::Hr, Role::Payroll])
            .restricted("/audit-logs", &[Role::Admin, Role::Hr, Role::Security])
            .restricted("/settings", &[Role::Admin, Role::Hr])
    }
}

impl RouteTable {
    /// Empty table: every route needs an authenticated identity and nothing more.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn public(mut self, route: &str) -> Self {
        self.routes.insert(route.to_string(), Access::Public);
        self
    }

    #[must_use]
    pub fn restricted(mut self, route: &str, roles: &[Role]) -> Self {
        self.routes
            .insert(route.to_string(), Access::Roles(roles.to_vec()));
        self
    }

    /// Longest registered prefix (on `/` boundaries) wins.
    fn access(&self, path: &str) -> &Access {
        self.routes
            .iter()
            .filter(|(route, _)| {
                path == route.as_str()
                    || path
                        .strip_prefix(route.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(route, _)| route.len())
            .map_or(&AUTHENTICATED, |(_, access)| access)
    }

    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        matches!(self.access(path), Access::Public)
    }

    /// Roles allowed on `path`, `None` when any authenticated identity is.
    #[must_use]
    pub fn allowed_roles(&self, path: &str) -> Option<&[Role]> {
        match self.access(path) {
            Access::Roles(roles) => Some(roles),
            Access::Public | Access::Authenticated => None,
        }
    }

    #[must_use]
    pub fn decide(&self, snapshot: &AuthSnapshot, path: &str) -> Decision {
        let state = evaluate(snapshot, path, self.allowed_roles(path));
        let redirect = match state {
            GateState::Loading | GateState::Authorized(_) => None,
            GateState::Unauthenticated { .. } if self.is_public(path) => None,
            GateState::Unauthenticated { .. } => Some(Redirect {
                to: LOGIN_ROUTE,
                from: path.to_string(),
                unauthorized: false,
            }),
            GateState::StepUpRequired => Some(Redirect {
                to: STEP_UP_ROUTE,
                from: path.to_string(),
                unauthorized: false,
            }),
            GateState::Unauthorized(_) => Some(Redirect {
                to: DEFAULT_ROUTE,
                from: path.to_string(),
                unauthorized: true,
            }),
        };
        Decision { state, redirect }
    }
}

/// Combined authentication and role gate for one route.
#[must_use]
pub fn evaluate(snapshot: &AuthSnapshot, path: &str, allowed: Option<&[Role]>) -> GateState {
    if snapshot.loading {
        return GateState::Loading;
    }
    let Some(identity) = &snapshot.identity else {
        return GateState::Unauthenticated {
            session_expired: snapshot.session_expired,
        };
    };
    if snapshot.needs_step_up && path != STEP_UP_ROUTE {
        return GateState::StepUpRequired;
    }
    match allowed {
        Some(roles) if !roles.contains(&identity.role) => GateState::Unauthorized(identity.role),
        _ => GateState::Authorized(identity.role),
    }
}
