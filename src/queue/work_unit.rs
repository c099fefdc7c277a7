// src/queue/work_unit.rs

//! Work unit assignment and the shared run context of a build.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::errors::TaskError;
use crate::exec::Executor;
use crate::queue::latch::Latch;
use crate::queue::{Executable, SubTask};

/// Context shared by every work unit of one logical build.
///
/// Executors report into it; it decides how errors become the build's
/// recorded result and tells sibling work units to stop.
pub trait RunContext: Send + Sync {
    /// Called on the worker thread right before the task body runs.
    fn synchronize_start(&self) -> Result<(), TaskError>;

    /// Called once per run when the executor finishes bookkeeping.
    fn synchronize_end(
        &self,
        executor: &Executor,
        executable: Option<&Arc<dyn Executable>>,
        error: Option<&TaskError>,
        elapsed: Duration,
    ) -> Result<(), TaskError>;

    /// Abort the whole build because one of its work units failed.
    fn abort(&self, error: &TaskError);
}

/// Assignment of one task to one executor.
///
/// The executor binding is exclusive: it is set once at the commit point and
/// released once in `finish1`.
pub struct WorkUnit {
    pub work: Arc<dyn SubTask>,
    pub context: Arc<dyn RunContext>,
    queued_at: Instant,
    binding: Mutex<Binding>,
}

#[derive(Default)]
struct Binding {
    executor: Option<Weak<Executor>>,
    executable: Option<Arc<dyn Executable>>,
    /// Some executor passed the commit point for this unit.
    claimed: bool,
}

impl WorkUnit {
    pub fn new(work: Arc<dyn SubTask>, context: Arc<dyn RunContext>) -> Arc<Self> {
        Self::with_queued_at(work, context, Instant::now())
    }

    /// Same as [`WorkUnit::new`] with an explicit "became buildable" time.
    pub fn with_queued_at(
        work: Arc<dyn SubTask>,
        context: Arc<dyn RunContext>,
        queued_at: Instant,
    ) -> Arc<Self> {
        Arc::new(Self {
            work,
            context,
            queued_at,
            binding: Mutex::new(Binding::default()),
        })
    }

    pub fn queued_at(&self) -> Instant {
        self.queued_at
    }

    pub fn set_executor(&self, executor: Option<&Arc<Executor>>) {
        let mut binding = self.binding.lock();
        binding.claimed |= executor.is_some();
        binding.executor = executor.map(Arc::downgrade);
    }

    /// Executor currently bound to this unit, if any.
    pub fn executor(&self) -> Option<Arc<Executor>> {
        self.binding
            .lock()
            .executor
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn set_executable(&self, executable: Arc<dyn Executable>) {
        self.binding.lock().executable = Some(executable);
    }

    pub fn executable(&self) -> Option<Arc<dyn Executable>> {
        self.binding.lock().executable.clone()
    }

    /// True once an executable was created for this unit; it can no longer
    /// go back to the queue.
    pub fn is_committed(&self) -> bool {
        self.binding.lock().executable.is_some()
    }

    /// True once an executor bound itself to this unit, even if it died
    /// before creating the executable. Claimed units are never re-queued.
    pub fn is_claimed(&self) -> bool {
        self.binding.lock().claimed
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.work.display_name())
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("work", &self.work.display_name())
            .field("committed", &self.is_committed())
            .finish_non_exhaustive()
    }
}

/// What an executor reported when one work unit ended.
#[derive(Debug, Clone)]
pub struct EndRecord {
    pub executor: String,
    pub executable: Option<String>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Stock [`RunContext`] for a build made of `work_units` units.
///
/// - start and end are rendezvous points for all units
/// - the first abort wins and releases every waiting sibling
/// - every `synchronize_end` is recorded so callers can wait for the build
#[derive(Debug)]
pub struct BuildContext {
    name: String,
    work_units: usize,
    start: Latch,
    end: Latch,
    state: Mutex<BuildState>,
    finished: Condvar,
}

#[derive(Debug, Default)]
struct BuildState {
    aborted: Option<String>,
    ends: Vec<EndRecord>,
}

impl BuildContext {
    pub fn new(name: impl Into<String>, work_units: usize) -> Arc<Self> {
        let work_units = work_units.max(1);
        Arc::new(Self {
            name: name.into(),
            work_units,
            start: Latch::new(work_units),
            end: Latch::new(work_units),
            state: Mutex::new(BuildState::default()),
            finished: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Message of the first error that aborted the build.
    pub fn aborted(&self) -> Option<String> {
        self.state.lock().aborted.clone()
    }

    pub fn ends(&self) -> Vec<EndRecord> {
        self.state.lock().ends.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().ends.len() >= self.work_units
    }

    /// Block until every work unit reported its end, or `timeout` passes.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.ends.len() < self.work_units {
            if self.finished.wait_until(&mut state, deadline).timed_out() {
                return state.ends.len() >= self.work_units;
            }
        }
        true
    }

    /// Block until the build completed, or was aborted before any of its
    /// units started running, or `timeout` passes. Returns whether it settled.
    pub fn wait_until_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let settled = state.ends.len() >= self.work_units
                || (state.aborted.is_some() && self.start.arrived() == 0);
            if settled {
                return true;
            }
            if self.finished.wait_until(&mut state, deadline).timed_out() {
                return false;
            }
        }
    }
}

impl RunContext for BuildContext {
    fn synchronize_start(&self) -> Result<(), TaskError> {
        self.start.synchronize()
    }

    fn synchronize_end(
        &self,
        executor: &Executor,
        executable: Option<&Arc<dyn Executable>>,
        error: Option<&TaskError>,
        elapsed: Duration,
    ) -> Result<(), TaskError> {
        {
            let mut state = self.state.lock();
            state.ends.push(EndRecord {
                executor: executor.display_name(),
                executable: executable.map(|e| e.display_name()),
                error: error.map(|e| e.to_string()),
                elapsed,
            });
            self.finished.notify_all();
        }
        debug!(
            build = %self.name,
            executor = %executor.display_name(),
            elapsed_ms = elapsed.as_millis() as u64,
            "work unit reached end of run"
        );
        self.end.synchronize()
    }

    fn abort(&self, error: &TaskError) {
        let reason = error.to_string();
        {
            let mut state = self.state.lock();
            if state.aborted.is_some() {
                return;
            }
            state.aborted = Some(reason.clone());
            self.finished.notify_all();
        }
        warn!(build = %self.name, error = %reason, "aborting build");
        self.start.abort(&reason);
        self.end.abort(&reason);
    }
}
