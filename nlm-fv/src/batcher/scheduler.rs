//! Timer, task, and clock capabilities used by the batcher
//!
//! The batcher never touches the runtime directly; it goes through these
//! traits so tests can substitute their own time source.

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use tokio::runtime::Handle;

/// Unit of deferred work
pub type Task = BoxFuture<'static, ()>;

/// Delayed and immediate task execution
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed
    fn schedule_after(&self, delay: Duration, task: Task) -> TimerHandle;

    /// Run `task` in the background without waiting for it
    fn spawn(&self, task: Task);
}

/// Handle to a pending timer
///
/// Dropping the handle leaves the timer armed; only [`TimerHandle::cancel`]
/// disarms it.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Scheduler backed by a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the calling task
    ///
    /// # Panics
    /// When called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) -> TimerHandle {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        TimerHandle::new(move || join.abort())
    }

    fn spawn(&self, task: Task) {
        self.handle.spawn(task);
    }
}

/// Wall-clock source for event timestamps
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Real UTC clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
