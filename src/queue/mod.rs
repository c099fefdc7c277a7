// src/queue/mod.rs

//! Scheduler-side collaborators of an executor.
//!
//! - [`SubTask`] / [`Executable`] describe the work an executor runs.
//! - [`Queue`] is the scheduler contract an executor calls into: the
//!   queue-wide commit lock, start notifications, task execution and
//!   maintenance.
//! - [`work_unit`] holds the [`WorkUnit`] assignment and the shared
//!   [`RunContext`] of a build ([`BuildContext`] is the stock one).
//! - [`latch`] is the rendezvous used by `BuildContext`.
//! - [`work_queue`] is a concrete FIFO scheduler that hands work units to the
//!   parked executors of attached nodes.

pub mod latch;
pub mod work_queue;
pub mod work_unit;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::TaskError;
use crate::exec::{AsynchronousExecution, ExecutionContext, Executor};

pub use latch::Latch;
pub use work_queue::WorkQueue;
pub use work_unit::{BuildContext, EndRecord, RunContext, WorkUnit};

/// A unit of work as queued: knows how to create the object that runs it.
pub trait SubTask: Send + Sync {
    fn display_name(&self) -> String;

    /// Create the executable for one run of this task.
    ///
    /// Called exactly once per assignment, under the queue lock. An error here
    /// is treated as an abnormal death of the executor.
    fn create_executable(&self) -> anyhow::Result<Arc<dyn Executable>>;
}

/// The running side of a task (a build, in CI terms).
pub trait Executable: Send + Sync {
    fn display_name(&self) -> String;

    /// Expected run time, if the task can estimate one.
    fn estimated_duration(&self) -> Option<Duration> {
        None
    }

    /// Run the task body on the executor's worker thread.
    ///
    /// Implementations should poll `ctx` for interruption and return
    /// `Err(TaskError::Interrupted)` once they observe it.
    fn run(&self, ctx: &ExecutionContext) -> Result<Completion, TaskError>;
}

/// How a task body handed control back to its worker thread.
pub enum Completion {
    /// The task is done; the executor finishes the run right away.
    Finished,
    /// The task keeps running after the worker thread returns; the executor
    /// stays busy until the handle reports completion.
    Asynchronous(AsynchronousExecution),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Finished => f.write_str("Finished"),
            Completion::Asynchronous(handle) => {
                f.debug_tuple("Asynchronous").field(handle).finish()
            }
        }
    }
}

/// Scheduler contract consumed by executors.
pub trait Queue: Send + Sync {
    /// Run `critical` while holding the queue-wide lock.
    ///
    /// Executors use this to make "claim work unit, create executable" atomic
    /// with respect to other executors claiming from the same queue. Returns
    /// `Err(TaskError::Interrupted)` if waiting for the lock was interrupted,
    /// in which case `critical` has not run.
    fn with_lock(&self, critical: &mut dyn FnMut()) -> Result<(), TaskError>;

    /// An executor committed to a work unit.
    fn on_start_executing(&self, executor: &Executor);

    /// Run the task body. Called from the executor's worker thread.
    fn execute(
        &self,
        executable: &Arc<dyn Executable>,
        _task: &Arc<dyn SubTask>,
        ctx: &ExecutionContext,
    ) -> Result<Completion, TaskError> {
        executable.run(ctx)
    }

    /// An executor freed up (or went away); re-run assignment.
    fn schedule_maintenance(&self);
}
