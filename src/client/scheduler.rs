//! Repeating background tasks with explicit cancellation.
//!
//! A [`TaskHandle`] owns its spawned task. Cancelling or dropping the handle aborts the
//! task, so a torn-down owner never leaves a timer behind.

use std::{future::Future, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::debug;

#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Wrap an already spawned task.
    #[must_use]
    pub fn from_join_handle(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self {
            name,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Cancelling task {}", self.name);
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run `job` every `period`, first after one full period. A slow job delays the next run
/// instead of bursting to catch up.
pub fn spawn_repeating<F, Fut>(name: &'static str, period: Duration, mut job: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let handle = tokio::spawn(async move {
        loop {
            ticker.tick().await;
            job().await;
        }
    });

    TaskHandle::from_join_handle(name, handle)
}
