// src/exec/context.rs

//! Explicit "current executor" context handed to task bodies.
//!
//! Code running on behalf of an executor receives an [`ExecutionContext`]
//! instead of looking the executor up from thread-local state.
//! [`on_behalf_of`] and [`impersonating`] cover code that runs on other
//! threads (e.g. a channel handler) but still acts for an executor.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::errors::TaskError;
use crate::exec::Executor;
use crate::types::BuildResult;

/// Granularity of [`ExecutionContext::sleep`]'s interruption checks.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Handle a task uses to talk to the executor running it.
#[derive(Clone)]
pub struct ExecutionContext {
    executor: Arc<Executor>,
    stop: CancellationToken,
}

impl ExecutionContext {
    pub(crate) fn new(executor: Arc<Executor>, stop: CancellationToken) -> Self {
        Self { executor, stop }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// True once the executor was asked to stop.
    pub fn is_interrupted(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// `Err(TaskError::Interrupted)` once the executor was asked to stop.
    pub fn check_interrupted(&self) -> Result<(), TaskError> {
        if self.is_interrupted() {
            Err(TaskError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Token for async code (`token.cancelled().await`).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Sleep for `duration`, waking early if interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check_interrupted()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Result the interrupting party asked for (see [`Executor::abort_result`]).
    pub fn abort_result(&self) -> BuildResult {
        self.executor.abort_result()
    }
}

/// Run `f` with a context acting for `executor`.
pub fn on_behalf_of<T>(executor: &Arc<Executor>, f: impl FnOnce(&ExecutionContext) -> T) -> T {
    let ctx = executor.context();
    f(&ctx)
}

/// Wrap `f` so every call runs on behalf of `executor`.
pub fn impersonating<F, T>(executor: Arc<Executor>, f: F) -> impl Fn() -> T + Send + Sync
where
    F: Fn(&ExecutionContext) -> T + Send + Sync,
{
    move || on_behalf_of(&executor, &f)
}
