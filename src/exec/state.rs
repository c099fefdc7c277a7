// src/exec/state.rs

//! Lock-guarded state of one executor.

use std::fmt;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

use crate::exec::AsynchronousExecution;
use crate::interrupt::CauseSet;
use crate::queue::{Executable, WorkUnit};
use crate::types::BuildResult;

/// Where an executor is in its one-shot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotPhase {
    /// Created by its node, no work unit yet, no thread.
    Parked,
    /// Work unit bound and worker thread launched; no executable yet.
    Assigned,
    /// Executable published; the task body is (about to be) running.
    Running,
    /// The worker thread returned but the task continues asynchronously.
    AsyncSuspended,
    /// Finished normally, abandoned before commit, or disposed unstarted.
    Completed,
    /// The worker thread terminated abnormally; see `cause_of_death`.
    Dead,
}

impl SlotPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotPhase::Completed | SlotPhase::Dead)
    }
}

/// Why an executor's worker thread died unexpectedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CauseOfDeath {
    message: String,
}

impl CauseOfDeath {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CauseOfDeath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Everything guarded by the executor's readers-writer lock.
///
/// Invariants:
/// - `executable.is_some()` implies `work_unit.is_some()` until `finish1`
///   releases the run
/// - `asynchronous.is_some()` keeps the executor busy after its thread exits
pub(crate) struct SlotState {
    pub phase: SlotPhase,
    pub started: bool,
    pub start_time: Option<Instant>,
    pub work_unit: Option<Arc<WorkUnit>>,
    pub executable: Option<Arc<dyn Executable>>,
    pub asynchronous: Option<AsynchronousExecution>,
    /// Set while `completed_asynchronous` runs, so a second call is refused.
    pub completing: bool,
    pub worker: Option<JoinHandle<()>>,
    pub worker_id: Option<ThreadId>,
    pub interrupt_result: Option<BuildResult>,
    /// The stop signal was raised by a shutdown interrupt.
    pub stop_for_shutdown: bool,
    pub causes: CauseSet,
    pub cause_of_death: Option<CauseOfDeath>,
}

impl SlotState {
    pub fn new() -> Self {
        Self {
            phase: SlotPhase::Parked,
            started: false,
            start_time: None,
            work_unit: None,
            executable: None,
            asynchronous: None,
            completing: false,
            worker: None,
            worker_id: None,
            interrupt_result: None,
            stop_for_shutdown: false,
            causes: CauseSet::new(),
            cause_of_death: None,
        }
    }

    pub fn worker_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }
}
