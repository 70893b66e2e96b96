//! Time and task scheduling seams.
//!
//! The engine runs on a single-threaded event loop. Hosts supply the loop
//! through [`Executor`] (spawn a detached task, sleep for a timeout) and the
//! wall clock through [`Clock`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait Executor {
    /// Run a task to completion in the background. The task must not fail.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);

    /// Resolve after `duration` has elapsed
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Race `fut` against the executor's timer. Returns `None` on timeout.
pub async fn with_timeout<T>(
    executor: &dyn Executor,
    duration: Duration,
    fut: impl std::future::Future<Output = T>,
) -> Option<T> {
    futures::pin_mut!(fut);
    match futures::future::select(fut, executor.sleep(duration)).await {
        futures::future::Either::Left((value, _)) => Some(value),
        futures::future::Either::Right(((), _)) => None,
    }
}
