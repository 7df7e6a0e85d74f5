//! Device-side session policy.
//!
//! Everything here runs on the user's device. The server never sees the session window or
//! the step-up deadline; those are local rules layered on top of the provider session.

pub mod gate;
pub mod gotrue_session;
pub mod lockout;
pub mod login;
pub mod policy;
pub mod provider;
pub mod scheduler;
pub mod session_window;
pub mod step_up;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

use chrono::{DateTime, Utc};
use tracing::warn;

pub use gate::{Decision, GateState, Redirect, RouteTable};
pub use gotrue_session::ProviderSession;
pub use lockout::{LockoutState, LoginLockout};
pub use login::{ApiClient, ApiClientError, LoginError, LoginFlow};
pub use policy::{AuthPolicy, AuthSnapshot, PolicyHandle};
pub use provider::{AuthEvent, ClientIdentity, ClientSession};
pub use session_window::SessionTracker;
pub use step_up::{StepUpError, StepUpFlow, StepUpTracker};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};

/// Read an epoch-milliseconds timestamp. Unparseable values are treated as absent.
pub(crate) async fn read_epoch_ms(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    let parsed = raw
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(crate::clock::from_epoch_ms);
    if parsed.is_none() {
        warn!("Ignoring unreadable timestamp under {key}: {raw:?}");
    }
    Ok(parsed)
}

pub(crate) async fn write_epoch_ms(
    store: &dyn KeyValueStore,
    key: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    store.set(key, &at.timestamp_millis().to_string()).await
}
