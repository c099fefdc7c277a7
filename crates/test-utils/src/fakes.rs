use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::{Condvar, Mutex, ReentrantMutex};

use buildexec::errors::TaskError;
use buildexec::exec::{
    AsynchronousBody, AsynchronousExecution, ExecutionContext, Executor, ExecutorSettings,
};
use buildexec::interrupt::{InterruptionCause, InterruptionTarget};
use buildexec::node::{Computer, TerminationRequest};
use buildexec::queue::{Completion, EndRecord, Executable, Queue, RunContext, SubTask, WorkUnit};

/// A computer that records what executors ask of it.
pub struct FakeComputer {
    name: String,
    online: AtomicBool,
    present: AtomicBool,
    removed: Mutex<Vec<usize>>,
    terminations: Mutex<Vec<TerminationRequest>>,
    connected_at: Mutex<Option<Instant>>,
}

impl FakeComputer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            online: AtomicBool::new(true),
            present: AtomicBool::new(true),
            removed: Mutex::new(Vec::new()),
            terminations: Mutex::new(Vec::new()),
            connected_at: Mutex::new(None),
        })
    }

    /// Owner handle to pass to `Executor::new`.
    pub fn owner(self: &Arc<Self>) -> Weak<dyn Computer> {
        let owner: Arc<dyn Computer> = self.clone();
        Arc::downgrade(&owner)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn set_connect_time(&self, at: Instant) {
        *self.connected_at.lock() = Some(at);
    }

    pub fn add_termination(&self, reason: &str, at: Instant) {
        self.terminations.lock().push(TerminationRequest::new(reason, at));
    }

    /// Numbers of the executors removed so far, in order.
    pub fn removed(&self) -> Vec<usize> {
        self.removed.lock().clone()
    }
}

impl Computer for FakeComputer {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn has_node(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn remove_executor(&self, executor: &Executor) {
        self.removed.lock().push(executor.number());
    }

    fn terminated_by(&self) -> Vec<TerminationRequest> {
        self.terminations.lock().clone()
    }

    fn connect_time(&self) -> Option<Instant> {
        *self.connected_at.lock()
    }
}

/// A queue that only counts calls.
#[derive(Default)]
pub struct FakeQueue {
    lock: ReentrantMutex<()>,
    interrupt_lock: AtomicBool,
    started: Mutex<Vec<usize>>,
    maintenance: AtomicUsize,
}

impl FakeQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `with_lock` fail as if waiting for the lock was interrupted.
    pub fn interrupt_lock_waits(&self) {
        self.interrupt_lock.store(true, Ordering::SeqCst);
    }

    /// Numbers of the executors that reported `on_start_executing`.
    pub fn started(&self) -> Vec<usize> {
        self.started.lock().clone()
    }

    pub fn maintenance_count(&self) -> usize {
        self.maintenance.load(Ordering::SeqCst)
    }
}

impl Queue for FakeQueue {
    fn with_lock(&self, critical: &mut dyn FnMut()) -> Result<(), TaskError> {
        if self.interrupt_lock.load(Ordering::SeqCst) {
            return Err(TaskError::Interrupted);
        }
        let _guard = self.lock.lock();
        critical();
        Ok(())
    }

    fn on_start_executing(&self, executor: &Executor) {
        self.started.lock().push(executor.number());
    }

    fn schedule_maintenance(&self) {
        self.maintenance.fetch_add(1, Ordering::SeqCst);
    }
}

/// What [`RecordingContext::synchronize_end`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBehaviour {
    Ok,
    Interrupted,
    Fail,
}

/// Run context that records every call.
pub struct RecordingContext {
    starts: AtomicUsize,
    ends: Mutex<Vec<EndRecord>>,
    aborts: Mutex<Vec<String>>,
    end_behaviour: Mutex<EndBehaviour>,
    ended: Condvar,
}

impl RecordingContext {
    pub fn new() -> Arc<Self> {
        Self::with_end_behaviour(EndBehaviour::Ok)
    }

    pub fn with_end_behaviour(behaviour: EndBehaviour) -> Arc<Self> {
        Arc::new(Self {
            starts: AtomicUsize::new(0),
            ends: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
            end_behaviour: Mutex::new(behaviour),
            ended: Condvar::new(),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> Vec<EndRecord> {
        self.ends.lock().clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.aborts.lock().clone()
    }

    /// Wait until at least `count` ends were recorded.
    pub fn wait_for_ends(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ends = self.ends.lock();
        while ends.len() < count {
            if self.ended.wait_until(&mut ends, deadline).timed_out() {
                return ends.len() >= count;
            }
        }
        true
    }
}

impl RunContext for RecordingContext {
    fn synchronize_start(&self) -> Result<(), TaskError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn synchronize_end(
        &self,
        executor: &Executor,
        executable: Option<&Arc<dyn Executable>>,
        error: Option<&TaskError>,
        elapsed: Duration,
    ) -> Result<(), TaskError> {
        let mut ends = self.ends.lock();
        ends.push(EndRecord {
            executor: executor.display_name(),
            executable: executable.map(|e| e.display_name()),
            error: error.map(|e| e.to_string()),
            elapsed,
        });
        self.ended.notify_all();
        drop(ends);

        match *self.end_behaviour.lock() {
            EndBehaviour::Ok => Ok(()),
            EndBehaviour::Interrupted => Err(TaskError::Interrupted),
            EndBehaviour::Fail => Err(TaskError::failed("end synchronization failed")),
        }
    }

    fn abort(&self, error: &TaskError) {
        self.aborts.lock().push(error.to_string());
    }
}

/// Barrier a task body parks on until the test opens it.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Default)]
struct GateState {
    entered: bool,
    open: bool,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.cond.notify_all();
    }

    /// Wait until a body reached the gate.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.entered {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.entered;
            }
        }
        true
    }

    fn pass(&self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        let mut state = self.state.lock();
        state.entered = true;
        self.cond.notify_all();
        while !state.open {
            ctx.check_interrupted()?;
            self.cond.wait_for(&mut state, Duration::from_millis(10));
        }
        Ok(())
    }
}

/// What a [`ScriptedExecutable`] does when run.
#[derive(Clone)]
pub enum Behaviour {
    Finish,
    Fail(String),
    Panic(String),
    Sleep(Duration),
    /// Block until interrupted.
    UntilInterrupted,
    /// Block on the gate, then finish.
    Gate(Arc<Gate>),
    /// Hand this continuation back to the executor.
    Async(AsynchronousExecution),
    /// Complete the continuation, then hand it back.
    AsyncCompletedEarly(AsynchronousExecution),
    /// Interrupt our own executor, then observe it.
    SelfInterrupt,
    /// Shut our own executor down, then hand this continuation back.
    AsyncAfterShutdown(AsynchronousExecution),
}

/// Executable following a [`Behaviour`].
pub struct ScriptedExecutable {
    name: String,
    behaviour: Behaviour,
    estimate: Option<Duration>,
    runs: AtomicUsize,
    thread_name: Mutex<Option<String>>,
}

impl ScriptedExecutable {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Name of the thread the body ran on.
    pub fn thread_name(&self) -> Option<String> {
        self.thread_name.lock().clone()
    }
}

impl Executable for ScriptedExecutable {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn estimated_duration(&self) -> Option<Duration> {
        self.estimate
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<Completion, TaskError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.thread_name.lock() = thread::current().name().map(str::to_string);

        match &self.behaviour {
            Behaviour::Finish => Ok(Completion::Finished),
            Behaviour::Fail(msg) => Err(TaskError::failed(msg.clone())),
            Behaviour::Panic(msg) => panic!("{msg}"),
            Behaviour::Sleep(d) => {
                ctx.sleep(*d)?;
                Ok(Completion::Finished)
            }
            Behaviour::UntilInterrupted => loop {
                ctx.sleep(Duration::from_secs(60))?;
            },
            Behaviour::Gate(gate) => {
                gate.pass(ctx)?;
                Ok(Completion::Finished)
            }
            Behaviour::Async(handle) => Ok(Completion::Asynchronous(handle.clone())),
            Behaviour::AsyncCompletedEarly(handle) => {
                handle.completed(None);
                Ok(Completion::Asynchronous(handle.clone()))
            }
            Behaviour::AsyncAfterShutdown(handle) => {
                ctx.executor().interrupt_for_shutdown();
                Ok(Completion::Asynchronous(handle.clone()))
            }
            Behaviour::SelfInterrupt => {
                ctx.executor().interrupt();
                ctx.check_interrupted()?;
                Ok(Completion::Finished)
            }
        }
    }
}

/// Sub-task that always hands out the same [`ScriptedExecutable`].
pub struct ScriptedTask {
    executable: Arc<ScriptedExecutable>,
    fail_creation: bool,
    creations: AtomicUsize,
}

impl ScriptedTask {
    pub fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
        Self::with_estimate(name, behaviour, None)
    }

    pub fn with_estimate(name: &str, behaviour: Behaviour, estimate: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            executable: Arc::new(ScriptedExecutable {
                name: name.to_string(),
                behaviour,
                estimate,
                runs: AtomicUsize::new(0),
                thread_name: Mutex::new(None),
            }),
            fail_creation: false,
            creations: AtomicUsize::new(0),
        })
    }

    /// A task whose `create_executable` fails.
    pub fn failing_creation(name: &str) -> Arc<Self> {
        Arc::new(Self {
            executable: Arc::new(ScriptedExecutable {
                name: name.to_string(),
                behaviour: Behaviour::Finish,
                estimate: None,
                runs: AtomicUsize::new(0),
                thread_name: Mutex::new(None),
            }),
            fail_creation: true,
            creations: AtomicUsize::new(0),
        })
    }

    pub fn executable(&self) -> &Arc<ScriptedExecutable> {
        &self.executable
    }

    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }
}

impl SubTask for ScriptedTask {
    fn display_name(&self) -> String {
        self.executable.name.clone()
    }

    fn create_executable(&self) -> anyhow::Result<Arc<dyn Executable>> {
        self.creations.fetch_add(1, Ordering::SeqCst);
        if self.fail_creation {
            return Err(anyhow!("cannot create {}", self.executable.name));
        }
        Ok(self.executable.clone())
    }
}

/// Continuation body recording interrupt requests.
pub struct RecordingBody {
    interrupts: Arc<Mutex<Vec<bool>>>,
    display: bool,
}

impl RecordingBody {
    /// Returns the body and a handle to the `for_shutdown` flags it saw.
    pub fn new(display: bool) -> (Self, Arc<Mutex<Vec<bool>>>) {
        let interrupts = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                interrupts: Arc::clone(&interrupts),
                display,
            },
            interrupts,
        )
    }
}

impl AsynchronousBody for RecordingBody {
    fn interrupt(&self, for_shutdown: bool) {
        self.interrupts.lock().push(for_shutdown);
    }

    fn display_cell(&self) -> bool {
        self.display
    }
}

/// Interruption target collecting the causes it is handed.
#[derive(Default)]
pub struct RecordingTarget {
    causes: Mutex<Vec<InterruptionCause>>,
    calls: AtomicUsize,
}

impl RecordingTarget {
    pub fn causes(&self) -> Vec<InterruptionCause> {
        self.causes.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InterruptionTarget for RecordingTarget {
    fn record_interruption(&self, causes: Vec<InterruptionCause>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.causes.lock().extend(causes);
    }
}

/// Executor #`number` owned by `computer`, reporting to `queue`.
pub fn fake_executor(
    computer: &Arc<FakeComputer>,
    queue: &Arc<FakeQueue>,
    number: usize,
    settings: ExecutorSettings,
) -> Arc<Executor> {
    let queue: Arc<dyn Queue> = queue.clone();
    Executor::new(computer.owner(), queue, number, settings)
}

/// Work unit for `task` reporting into `context`.
pub fn work_unit(task: &Arc<ScriptedTask>, context: &Arc<RecordingContext>) -> Arc<WorkUnit> {
    let task: Arc<dyn SubTask> = task.clone();
    let context: Arc<dyn RunContext> = context.clone();
    WorkUnit::new(task, context)
}
