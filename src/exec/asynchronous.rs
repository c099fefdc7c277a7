// src/exec/asynchronous.rs

//! Bridge between a blocking worker thread and a task that keeps running
//! after that thread returns.
//!
//! A task hands an [`AsynchronousExecution`] back to its executor through
//! [`Completion::Asynchronous`](crate::queue::Completion::Asynchronous). The
//! executor then stays busy until someone calls
//! [`AsynchronousExecution::completed`], typically from a tokio task.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::TaskError;
use crate::exec::Executor;

/// The task-specific half of an asynchronous execution.
pub trait AsynchronousBody: Send + Sync {
    /// Cancel the continuation. `for_shutdown` is set when the whole process
    /// is going down rather than one build being aborted.
    fn interrupt(&self, for_shutdown: bool);

    /// Whether a pending restart should wait for this execution.
    fn blocks_restart(&self) -> bool {
        true
    }

    /// Whether the executor should be shown in executor listings. A body
    /// whose progress is already displayed elsewhere can hide it.
    fn display_cell(&self) -> bool {
        true
    }
}

/// Cloneable handle for a task continuing past its worker thread.
#[derive(Clone)]
pub struct AsynchronousExecution {
    inner: Arc<Inner>,
}

struct Inner {
    body: Box<dyn AsynchronousBody>,
    link: Mutex<Link>,
}

#[derive(Default)]
struct Link {
    executor: Option<Weak<Executor>>,
    /// Completion that arrived before the executor attached.
    early: Option<Option<TaskError>>,
    completed: bool,
}

impl AsynchronousExecution {
    pub fn new(body: impl AsynchronousBody + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                body: Box::new(body),
                link: Mutex::new(Link::default()),
            }),
        }
    }

    /// Forward a cancellation request to the body.
    pub fn request_cancel(&self, for_shutdown: bool) {
        self.inner.body.interrupt(for_shutdown);
    }

    pub fn wants_display(&self) -> bool {
        self.inner.body.display_cell()
    }

    pub fn blocks_restart(&self) -> bool {
        self.inner.body.blocks_restart()
    }

    /// Executor this execution was handed to, once attached.
    pub fn executor(&self) -> Option<Arc<Executor>> {
        self.inner
            .link
            .lock()
            .executor
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn is_completed(&self) -> bool {
        self.inner.link.lock().completed
    }

    /// Report that the continuation finished, successfully or with `error`.
    ///
    /// Only the first call has an effect.
    pub fn completed(&self, error: Option<TaskError>) {
        let executor = {
            let mut link = self.inner.link.lock();
            if link.completed {
                warn!("asynchronous execution reported completion twice; ignoring");
                return;
            }
            link.completed = true;

            match link.executor.as_ref().map(Weak::upgrade) {
                Some(Some(executor)) => executor,
                Some(None) => {
                    warn!("asynchronous execution completed after its executor was dropped");
                    return;
                }
                None => {
                    debug!("asynchronous execution completed before handoff; deferring");
                    link.early = Some(error);
                    return;
                }
            }
        };

        executor.completed_asynchronous(error);
    }

    /// Set the back-reference. Called once by the executor at handoff, after
    /// it has stored this handle and released its own lock.
    pub(crate) fn attach(&self, executor: &Arc<Executor>) {
        let early = {
            let mut link = self.inner.link.lock();
            if link.executor.is_some() {
                warn!(
                    executor = %executor.display_name(),
                    "asynchronous execution already attached; ignoring"
                );
                return;
            }
            link.executor = Some(Arc::downgrade(executor));
            link.early.take()
        };

        if let Some(error) = early {
            executor.completed_asynchronous(error);
        }
    }
}

impl fmt::Debug for AsynchronousExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let link = self.inner.link.lock();
        f.debug_struct("AsynchronousExecution")
            .field("attached", &link.executor.is_some())
            .field("completed", &link.completed)
            .finish_non_exhaustive()
    }
}
