// src/exec/executor.rs

//! The execution slot: one worker thread, at most one task, one lifecycle.
//!
//! An [`Executor`] is created parked by its node, started once with a
//! [`WorkUnit`], and discarded when the run ends. All mutable state sits
//! behind a single readers-writer lock that is only held for short,
//! non-blocking updates; the task body always runs outside of it.

use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{panic_message, BuildExecError, Result, TaskError};
use crate::exec::asynchronous::AsynchronousExecution;
use crate::exec::context::ExecutionContext;
use crate::exec::diagnostics::{progress_percent, time_span_string, ExecutorSettings};
use crate::exec::state::{CauseOfDeath, SlotPhase, SlotState};
use crate::interrupt::{InterruptionCause, InterruptionTarget};
use crate::node::Computer;
use crate::queue::{Completion, Executable, Queue, SubTask, WorkUnit};
use crate::types::BuildResult;

const NOT_AVAILABLE: &str = "N/A";

/// A busy executor never reports becoming idle sooner than this.
const IDLE_LOOKAHEAD: Duration = Duration::from_secs(15);

/// One worker's right to run one task.
pub struct Executor {
    owner: Weak<dyn Computer>,
    queue: Arc<dyn Queue>,
    number: usize,
    settings: ExecutorSettings,
    created_at: Instant,
    state: RwLock<SlotState>,
    /// Cooperative stop signal observed by the running task.
    stop: CancellationToken,
    /// Test hook: make the worker thread die before committing.
    induce_death: AtomicBool,
}

/// Why the worker thread stopped before finishing its run.
enum RunFailure {
    /// Bookkeeping was interrupted by this executor's own stop signal.
    Interrupted,
    Death(CauseOfDeath),
}

/// How the worker thread's assignment ended when it did not fail.
enum RunExit {
    /// Run finished or was abandoned before commit; `finish2` is still due.
    Done,
    /// An asynchronous continuation owns the remaining bookkeeping.
    Suspended,
}

type Commit = Option<(Arc<dyn SubTask>, Arc<dyn Executable>)>;

impl Executor {
    pub fn new(
        owner: Weak<dyn Computer>,
        queue: Arc<dyn Queue>,
        number: usize,
        settings: ExecutorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            owner,
            queue,
            number,
            created_at: settings.clock.now(),
            settings,
            state: RwLock::new(SlotState::new()),
            stop: CancellationToken::new(),
            induce_death: AtomicBool::new(false),
        })
    }

    /// Number identifying this executor among its node's executors.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn display_name(&self) -> String {
        format!("Executor #{}", self.number)
    }

    /// Display name qualified with the owning node; also the thread name.
    pub fn name(&self) -> String {
        match self.owner() {
            Some(owner) => format!("Executor #{} for {}", self.number, owner.display_name()),
            None => self.display_name(),
        }
    }

    /// Owning node, unless it has been dropped.
    pub fn owner(&self) -> Option<Arc<dyn Computer>> {
        self.owner.upgrade()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn creation_time(&self) -> Instant {
        self.created_at
    }

    /// Context handed to code acting on behalf of this executor.
    pub fn context(self: &Arc<Self>) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(self), self.stop.clone())
    }

    fn now(&self) -> Instant {
        self.settings.clock.now()
    }

    fn elapsed_since(&self, start: Option<Instant>) -> Duration {
        start
            .map(|s| self.now().saturating_duration_since(s))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bind `work_unit` and launch the worker thread.
    ///
    /// An executor runs at most once: calling this again, or after the
    /// executor was disposed, fails with [`BuildExecError::AlreadyStarted`].
    pub fn start(self: &Arc<Self>, work_unit: Arc<WorkUnit>) -> Result<()> {
        let mut state = self.state.write();
        if state.started || state.phase != SlotPhase::Parked {
            return Err(BuildExecError::AlreadyStarted {
                executor: self.name(),
            });
        }

        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(self.name())
            .spawn(move || this.run())?;

        debug!(executor = %self.name(), work = %work_unit, "executor started");

        state.worker_id = Some(handle.thread().id());
        state.worker = Some(handle);
        state.work_unit = Some(work_unit);
        state.started = true;
        state.phase = SlotPhase::Assigned;
        Ok(())
    }

    /// Body of the worker thread.
    fn run(self: Arc<Self>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_assignment()));

        let suspended = match outcome {
            Ok(Ok(RunExit::Suspended)) => true,
            Ok(Ok(RunExit::Done)) => false,
            Ok(Err(RunFailure::Interrupted)) => {
                debug!(executor = %self.name(), "interrupted; exiting");
                false
            }
            Ok(Err(RunFailure::Death(cause))) => {
                self.record_death(cause);
                false
            }
            Err(payload) => {
                self.record_death(CauseOfDeath::new(panic_message(payload.as_ref())));
                false
            }
        };

        if !suspended {
            self.finish2();
        }
    }

    fn run_assignment(self: &Arc<Self>) -> std::result::Result<RunExit, RunFailure> {
        if let Some(reason) = self.unavailable_reason("before the task's worker thread started") {
            self.abandon(&reason)?;
            return Ok(RunExit::Done);
        }

        let work_unit = {
            let mut state = self.state.write();
            state.start_time = Some(self.now());
            state.work_unit.clone()
        };
        let Some(work_unit) = work_unit else {
            return Ok(RunExit::Done);
        };

        if self.induce_death.load(Ordering::SeqCst) {
            return Err(RunFailure::Death(CauseOfDeath::new("induced death")));
        }

        // Assigned -> Running, atomically with respect to other executors
        // claiming from the same queue.
        let mut committed: Option<std::result::Result<Commit, RunFailure>> = None;
        self.queue
            .with_lock(&mut || committed = Some(self.commit(&work_unit)))
            .map_err(|e| match e {
                TaskError::Interrupted => RunFailure::Interrupted,
                other => RunFailure::Death(CauseOfDeath::new(format!(
                    "waiting for the queue lock failed: {other}"
                ))),
            })?;

        let Some(commit) = committed else {
            return Err(RunFailure::Death(CauseOfDeath::new(
                "queue lock returned without running the commit section",
            )));
        };
        let Some((task, executable)) = commit? else {
            // Abandoned under the queue lock.
            return Ok(RunExit::Done);
        };

        let ctx = self.context();
        let problems = match self.execute_body(&work_unit, &executable, &task, &ctx) {
            Ok(Completion::Finished) => None,
            Ok(Completion::Asynchronous(handle)) => {
                self.suspend(handle);
                return Ok(RunExit::Suspended);
            }
            Err(e) => Some(e),
        };

        self.finish1(&work_unit, problems).map_err(RunFailure::Death)?;
        Ok(RunExit::Done)
    }

    /// The commit point. Runs under the queue lock.
    ///
    /// Returns `None` if the node went away and the work unit was handed back.
    fn commit(
        self: &Arc<Self>,
        work_unit: &Arc<WorkUnit>,
    ) -> std::result::Result<Commit, RunFailure> {
        if let Some(reason) =
            self.unavailable_reason("before the task's worker thread was ready to execute")
        {
            self.abandon(&reason)?;
            return Ok(None);
        }

        // Past this point the assignment cannot be unwound: if the node goes
        // off-line or is removed, the build has to fail.
        work_unit.set_executor(Some(self));
        self.queue.on_start_executing(self);
        debug!(executor = %self.name(), work = %work_unit, "grabbed work unit from queue");

        let task = Arc::clone(&work_unit.work);
        let executable = task.create_executable().map_err(|e| {
            RunFailure::Death(CauseOfDeath::new(format!(
                "failed to create executable for {work_unit}: {e:#}"
            )))
        })?;

        {
            let mut state = self.state.write();
            state.executable = Some(Arc::clone(&executable));
            state.phase = SlotPhase::Running;
        }
        work_unit.set_executable(Arc::clone(&executable));

        Ok(Some((task, executable)))
    }

    fn execute_body(
        &self,
        work_unit: &WorkUnit,
        executable: &Arc<dyn Executable>,
        task: &Arc<dyn SubTask>,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Completion, TaskError> {
        work_unit.context.synchronize_start()?;

        info!(
            executor = %self.name(),
            executable = %executable.display_name(),
            "now executing"
        );

        panic::catch_unwind(AssertUnwindSafe(|| self.queue.execute(executable, task, ctx)))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
    }

    /// Store the continuation handle and let the worker thread exit.
    fn suspend(self: &Arc<Self>, handle: AsynchronousExecution) {
        {
            let mut state = self.state.write();
            state.asynchronous = Some(handle.clone());
            state.phase = SlotPhase::AsyncSuspended;
        }
        info!(executor = %self.name(), "task continues asynchronously");

        handle.attach(self);

        // A stop that landed while the body was returning was delivered to
        // the worker thread only; pass it on.
        if self.stop.is_cancelled() && !handle.is_completed() {
            let for_shutdown = self.state.read().stop_for_shutdown;
            handle.request_cancel(for_shutdown);
        }
    }

    /// Report the end of the run to the build context and release the work
    /// unit's binding, whatever the synchronization itself does.
    fn finish1(
        self: &Arc<Self>,
        work_unit: &Arc<WorkUnit>,
        problems: Option<TaskError>,
    ) -> std::result::Result<(), CauseOfDeath> {
        if let Some(problem) = &problems {
            if problem.is_interruption() {
                info!(executor = %self.name(), "task stopped after interruption");
            } else {
                error!(executor = %self.name(), error = %problem, "task failed");
            }
            work_unit.context.abort(problem);
        }

        let (elapsed, executable) = {
            let state = self.state.read();
            (self.elapsed_since(state.start_time), state.executable.clone())
        };
        info!(
            executor = %self.name(),
            work = %work_unit,
            elapsed_ms = elapsed.as_millis() as u64,
            "completed"
        );

        let synced =
            work_unit
                .context
                .synchronize_end(self, executable.as_ref(), problems.as_ref(), elapsed);

        let outcome = match synced {
            Ok(()) => Ok(()),
            Err(TaskError::Interrupted) => {
                work_unit.context.abort(&TaskError::Interrupted);
                Ok(())
            }
            Err(other) => Err(CauseOfDeath::new(format!(
                "end-of-run synchronization failed: {other}"
            ))),
        };
        work_unit.set_executor(None);
        outcome
    }

    /// Pool cleanup and maintenance trigger.
    fn finish2(self: &Arc<Self>) {
        let (run_started, died) = {
            let mut state = self.state.write();
            let died = state.cause_of_death.is_some();
            state.phase = if died {
                SlotPhase::Dead
            } else {
                SlotPhase::Completed
            };
            (state.start_time, died)
        };

        if let Some(owner) = self.owner() {
            for request in owner.terminated_by() {
                if run_started.is_none_or(|start| request.requested_at() >= start) {
                    warn!(executor = %self.name(), trace = %request, "termination trace");
                }
            }
            // A dead executor stays around for inspection until yanked.
            if !died {
                owner.remove_executor(self);
            }
        }

        self.queue.schedule_maintenance();
    }

    /// Finish a run that reached [`SlotPhase::AsyncSuspended`].
    ///
    /// Normally called through [`AsynchronousExecution::completed`]. Only the
    /// first call for an outstanding continuation has an effect.
    pub fn completed_asynchronous(self: &Arc<Self>, error: Option<TaskError>) {
        let work_unit = {
            let mut state = self.state.write();
            if state.asynchronous.is_none() || state.completing {
                warn!(
                    executor = %self.name(),
                    "no outstanding asynchronous execution to complete; ignoring"
                );
                return;
            }
            state.completing = true;
            state.work_unit.clone()
        };

        if let Some(work_unit) = work_unit {
            let finished =
                panic::catch_unwind(AssertUnwindSafe(|| self.finish1(&work_unit, error)))
                    .unwrap_or_else(|payload| {
                        Err(CauseOfDeath::new(panic_message(payload.as_ref())))
                    });
            if let Err(cause) = finished {
                self.record_death(cause);
            }
        }
        self.finish2();

        let mut state = self.state.write();
        state.asynchronous = None;
        state.completing = false;
    }

    fn record_death(&self, cause: CauseOfDeath) {
        error!(executor = %self.name(), cause = %cause, "unexpected executor death");

        let work_unit = {
            let mut state = self.state.write();
            state.cause_of_death = Some(cause.clone());
            state.phase = SlotPhase::Dead;
            state.work_unit.clone()
        };

        // A unit still bound to us would otherwise never report back.
        if let Some(unit) = work_unit {
            let bound_here = unit
                .executor()
                .is_some_and(|e| std::ptr::eq(Arc::as_ptr(&e), self));
            if bound_here {
                unit.context
                    .abort(&TaskError::failed(format!("executor died: {cause}")));
                unit.set_executor(None);
            }
        }
    }

    fn unavailable_reason(&self, when: &str) -> Option<String> {
        match self.owner() {
            None => Some(format!("was removed {when}")),
            Some(owner) if !owner.is_online() => Some(format!("went off-line {when}")),
            Some(owner) if !owner.has_node() => Some(format!("was removed {when}")),
            Some(_) => None,
        }
    }

    fn abandon(&self, reason: &str) -> std::result::Result<(), RunFailure> {
        self.reset_work_unit(reason)
            .map_err(|e| RunFailure::Death(CauseOfDeath::new(e.to_string())))
    }

    /// Hand the work unit back before an executable exists, so queue
    /// maintenance can make it buildable again.
    ///
    /// Fails with [`BuildExecError::ExecutableAlreadyCreated`] once the
    /// executable was published: from then on the run can only fail.
    pub fn reset_work_unit(&self, reason: &str) -> Result<()> {
        let owner = self.owner();
        let owner_name = owner
            .as_ref()
            .map(|o| o.display_name())
            .unwrap_or_else(|| "its node".to_string());
        let work = self
            .state
            .read()
            .work_unit
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "nothing".to_string());
        let traces = owner.map(|o| o.terminated_by()).unwrap_or_default();

        if traces.is_empty() {
            warn!(
                executor = %self.name(),
                work = %work,
                "{owner_name} {reason}; no termination trace available"
            );
        } else {
            warn!(
                executor = %self.name(),
                work = %work,
                "{owner_name} {reason}; termination trace follows"
            );
            for request in traces {
                warn!(executor = %self.name(), trace = %request, "termination trace");
            }
        }

        let mut state = self.state.write();
        if state.executable.is_some() {
            return Err(BuildExecError::ExecutableAlreadyCreated {
                executor: self.name(),
            });
        }
        state.work_unit = None;
        Ok(())
    }

    /// Test hook: simulate a fatal failure of the worker thread.
    pub fn kill_hard(&self) {
        self.induce_death.store(true, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Interruption
    // ------------------------------------------------------------------

    /// Interrupt the current run, recording [`BuildResult::Aborted`].
    ///
    /// From the executor's own worker thread this only raises the stop
    /// signal: code that interrupts itself has already recorded why.
    pub fn interrupt(&self) {
        let on_worker = self.state.read().worker_id == Some(thread::current().id());
        if on_worker {
            self.stop.cancel();
            return;
        }
        self.interrupt_inner(BuildResult::Aborted, false, Vec::new());
    }

    /// Interrupt the run and ask for `result` instead of `Aborted`.
    ///
    /// The latest call's result wins; causes accumulate without duplicates.
    pub fn interrupt_with(
        &self,
        result: BuildResult,
        causes: impl IntoIterator<Item = InterruptionCause>,
    ) {
        self.interrupt_inner(result, false, causes.into_iter().collect());
    }

    /// Abort on behalf of a named user.
    pub fn abort_by(&self, user: &str) {
        self.interrupt_with(BuildResult::Aborted, [InterruptionCause::user(user)]);
    }

    pub fn interrupt_for_shutdown(&self) {
        self.interrupt_inner(BuildResult::Aborted, true, vec![InterruptionCause::shutdown()]);
    }

    fn interrupt_inner(&self, result: BuildResult, for_shutdown: bool, causes: Vec<InterruptionCause>) {
        debug!(
            executor = %self.name(),
            %result,
            for_shutdown,
            causes = ?causes,
            "interrupted"
        );

        let mut state = self.state.write();
        if !state.started {
            // Not started yet, so there is nothing to cancel: dispose of it.
            state.phase = SlotPhase::Completed;
            drop(state);
            if let Some(owner) = self.owner() {
                owner.remove_executor(self);
            }
            return;
        }

        state.interrupt_result = Some(result);
        state.causes.extend(causes);

        match state.asynchronous.clone() {
            Some(handle) => {
                drop(state);
                handle.request_cancel(for_shutdown);
            }
            None => {
                state.stop_for_shutdown |= for_shutdown;
                if !self.stop.is_cancelled() {
                    self.stop.cancel();
                    debug!(executor = %self.name(), "stop signal delivered");
                }
            }
        }
    }

    /// Result to record after catching an interruption.
    pub fn abort_result(&self) -> BuildResult {
        // Interrupts without an explicit result (or a task cancelling itself)
        // mean a plain abort.
        self.state
            .read()
            .interrupt_result
            .unwrap_or(BuildResult::Aborted)
    }

    /// Drain the accumulated causes into `target` and print them to
    /// `listener`. Does nothing if there are none.
    pub fn record_cause_of_interruption(
        &self,
        target: &dyn InterruptionTarget,
        listener: &mut dyn Write,
    ) -> io::Result<()> {
        let causes = {
            let mut state = self.state.write();
            if state.causes.is_empty() {
                return Ok(());
            }
            state.causes.take()
        };

        target.record_interruption(causes.clone());
        for cause in &causes {
            cause.print(listener)?;
        }
        Ok(())
    }

    /// Request-stop: interrupt the current run, if an executable exists.
    ///
    /// Returns whether anything was interrupted.
    pub fn stop(&self) -> bool {
        let running = self.state.read().executable.is_some();
        if running {
            self.interrupt();
        }
        running
    }

    /// Discard this executor so its node replaces it with a fresh one.
    ///
    /// Only inactive executors (finished or dead) can be yanked.
    pub fn yank(&self) -> Result<()> {
        if self.is_active() {
            return Err(BuildExecError::ExecutorActive {
                executor: self.name(),
            });
        }
        if let Some(owner) = self.owner() {
            owner.remove_executor(self);
        }
        self.queue.schedule_maintenance();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn phase(&self) -> SlotPhase {
        self.state.read().phase
    }

    pub fn current_executable(&self) -> Option<Arc<dyn Executable>> {
        self.state.read().executable.clone()
    }

    pub fn current_work_unit(&self) -> Option<Arc<WorkUnit>> {
        self.state.read().work_unit.clone()
    }

    pub fn asynchronous_execution(&self) -> Option<AsynchronousExecution> {
        self.state.read().asynchronous.clone()
    }

    /// No work unit and no executable bound.
    pub fn is_idle(&self) -> bool {
        let state = self.state.read();
        state.work_unit.is_none() && state.executable.is_none()
    }

    pub fn is_busy(&self) -> bool {
        !self.is_idle()
    }

    /// Whether this executor still occupies its slot.
    ///
    /// True when it has not started yet, when an asynchronous continuation is
    /// outstanding, or while its worker thread is alive. Use this rather than
    /// looking at the thread: an executor with an outstanding continuation is
    /// busy even though its thread has exited.
    pub fn is_active(&self) -> bool {
        let state = self.state.read();
        !state.started || state.asynchronous.is_some() || state.worker_alive()
    }

    /// True until a work unit is assigned.
    pub fn is_parking(&self) -> bool {
        !self.state.read().started
    }

    /// Whether executor listings should show this executor.
    pub fn is_display_cell(&self) -> bool {
        self.asynchronous_execution()
            .is_none_or(|handle| handle.wants_display())
    }

    /// Set only if the worker thread died unexpectedly.
    pub fn cause_of_death(&self) -> Option<CauseOfDeath> {
        self.state.read().cause_of_death.clone()
    }

    pub fn interrupt_result(&self) -> Option<BuildResult> {
        self.state.read().interrupt_result
    }

    /// Causes recorded so far and not yet drained.
    pub fn interrupt_causes(&self) -> Vec<InterruptionCause> {
        self.state.read().causes.to_vec()
    }

    /// Whether the worker thread was sent its stop signal.
    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Time since the current run started (zero before it starts).
    pub fn elapsed_time(&self) -> Duration {
        let start = self.state.read().start_time;
        self.elapsed_since(start)
    }

    /// Elapsed time and the executable's estimate, if running.
    fn run_timing(&self) -> Option<(Duration, Option<Duration>)> {
        let (start, executable) = {
            let state = self.state.read();
            (state.start_time, state.executable.clone()?)
        };
        Some((self.elapsed_since(start), executable.estimated_duration()))
    }

    /// Progress in percent (`0..=99`), or `-1` without an estimate.
    pub fn progress(&self) -> i32 {
        match self.run_timing() {
            Some((elapsed, estimate)) => progress_percent(elapsed, estimate),
            None => -1,
        }
    }

    /// Heuristic: far past the estimate, or over a day without one.
    pub fn is_likely_stuck(&self) -> bool {
        match self.run_timing() {
            Some((elapsed, estimate)) => self.settings.stuck.is_stuck(elapsed, estimate),
            None => false,
        }
    }

    pub fn estimated_remaining_time(&self) -> Option<Duration> {
        let (elapsed, estimate) = self.run_timing()?;
        estimate?
            .checked_sub(elapsed)
            .filter(|eta| !eta.is_zero())
    }

    pub fn estimated_remaining_time_string(&self) -> String {
        self.estimated_remaining_time()
            .map(time_span_string)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// How long ago the current run started, e.g. `"3 min 4 sec"`.
    pub fn timestamp_string(&self) -> String {
        time_span_string(self.elapsed_time())
    }

    /// Time the current work unit waited in the queue before this run
    /// started.
    pub fn time_spent_in_queue(&self) -> Option<Duration> {
        let state = self.state.read();
        let start = state.start_time?;
        let unit = state.work_unit.as_ref()?;
        Some(start.saturating_duration_since(unit.queued_at()))
    }

    /// When this executor became (or is expected to become) idle.
    pub fn idle_start(&self) -> Instant {
        let (idle, executable, start) = {
            let state = self.state.read();
            (
                state.work_unit.is_none() && state.executable.is_none(),
                state.executable.clone(),
                state.start_time,
            )
        };
        if idle {
            let connected = self.owner().and_then(|o| o.connect_time());
            return connected.map_or(self.created_at, |c| c.max(self.created_at));
        }

        let estimate = executable
            .and_then(|e| e.estimated_duration())
            .unwrap_or_default();
        let start = start.unwrap_or(self.created_at);
        (start + estimate).max(self.now() + IDLE_LOOKAHEAD)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("number", &self.number)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
