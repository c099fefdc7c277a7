// src/jobs.rs

//! Simulated builds driven by `[job.<name>]` config sections.
//!
//! A [`ConfiguredJob`] is what gets queued; each assignment creates a
//! [`JobRun`] that sleeps cooperatively for the configured duration and then
//! concludes with the configured outcome. In `async` mode the run hands a
//! continuation back to its executor and finishes on the tokio runtime.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::JobConfig;
use crate::errors::TaskError;
use crate::exec::{on_behalf_of, AsynchronousBody, AsynchronousExecution, ExecutionContext};
use crate::interrupt::{InterruptionCause, InterruptionTarget};
use crate::queue::{Completion, Executable, SubTask};
use crate::types::{BuildResult, JobMode, JobOutcome};

/// What happened to a job's runs, shared between the job and its runs.
#[derive(Debug, Default)]
pub struct JobRecord {
    state: Mutex<RecordState>,
}

#[derive(Debug, Default)]
struct RecordState {
    result: Option<BuildResult>,
    causes: Vec<InterruptionCause>,
    log: Vec<String>,
}

impl JobRecord {
    /// Result of the last run, once it concluded.
    pub fn result(&self) -> Option<BuildResult> {
        self.state.lock().result
    }

    pub fn causes(&self) -> Vec<InterruptionCause> {
        self.state.lock().causes.clone()
    }

    /// Lines written to the build log.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    fn set_result(&self, result: BuildResult) {
        self.state.lock().result = Some(result);
    }

    fn append_log(&self, text: &str) {
        let mut state = self.state.lock();
        state
            .log
            .extend(text.lines().filter(|l| !l.is_empty()).map(str::to_string));
    }
}

/// A queued job.
pub struct ConfiguredJob {
    name: String,
    config: JobConfig,
    runtime: Handle,
    record: Arc<JobRecord>,
}

impl ConfiguredJob {
    /// `runtime` carries asynchronous continuations.
    pub fn new(name: impl Into<String>, config: JobConfig, runtime: Handle) -> Self {
        Self {
            name: name.into(),
            config,
            runtime,
            record: Arc::new(JobRecord::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn record(&self) -> Arc<JobRecord> {
        Arc::clone(&self.record)
    }
}

impl SubTask for ConfiguredJob {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn create_executable(&self) -> anyhow::Result<Arc<dyn Executable>> {
        Ok(Arc::new(JobRun {
            name: self.name.clone(),
            config: self.config.clone(),
            runtime: self.runtime.clone(),
            record: Arc::clone(&self.record),
        }))
    }
}

/// One run of a [`ConfiguredJob`].
#[derive(Clone)]
pub struct JobRun {
    name: String,
    config: JobConfig,
    runtime: Handle,
    record: Arc<JobRecord>,
}

impl JobRun {
    fn conclude(&self) -> Result<(), TaskError> {
        match self.config.outcome {
            JobOutcome::Success => Ok(()),
            JobOutcome::Failure => Err(TaskError::failed(format!("job '{}' failed", self.name))),
            JobOutcome::Panic => panic!("job '{}' panicked", self.name),
        }
    }

    /// Record the build result and, after an interruption, its causes.
    fn settle(&self, ctx: &ExecutionContext, outcome: &Result<(), TaskError>) {
        let result = match outcome {
            Ok(()) => BuildResult::Success,
            Err(TaskError::Interrupted) => {
                let mut listener = Vec::new();
                if let Err(e) = ctx
                    .executor()
                    .record_cause_of_interruption(self, &mut listener)
                {
                    debug!(job = %self.name, error = %e, "failed to write interruption causes");
                }
                self.record
                    .append_log(&String::from_utf8_lossy(&listener));
                ctx.abort_result()
            }
            Err(_) => BuildResult::Failure,
        };
        info!(job = %self.name, %result, "job concluded");
        self.record.set_result(result);
    }

    fn continue_async(&self, ctx: &ExecutionContext) -> AsynchronousExecution {
        let cancel = CancellationToken::new();
        let handle = AsynchronousExecution::new(CancelOnInterrupt {
            token: cancel.clone(),
        });

        let run = self.clone();
        let executor = Arc::clone(ctx.executor());
        let completion = handle.clone();
        let duration = self.config.duration();

        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    panic::catch_unwind(AssertUnwindSafe(|| run.conclude()))
                        .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
                }
                _ = cancel.cancelled() => Err(TaskError::Interrupted),
            };
            // Completion takes the queue lock and may wait on the executor's
            // lock; keep it off the async workers.
            let finish = tokio::task::spawn_blocking(move || {
                on_behalf_of(&executor, |ctx| run.settle(ctx, &outcome));
                completion.completed(outcome.err());
            });
            if let Err(e) = finish.await {
                error!("asynchronous completion did not run: {e}");
            }
        });

        handle
    }
}

impl Executable for JobRun {
    fn display_name(&self) -> String {
        format!("{} #run", self.name)
    }

    fn estimated_duration(&self) -> Option<Duration> {
        self.config.estimate()
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<Completion, TaskError> {
        match self.config.mode {
            JobMode::Sync => {
                let outcome = ctx
                    .sleep(self.config.duration())
                    .and_then(|()| self.conclude());
                self.settle(ctx, &outcome);
                outcome.map(|()| Completion::Finished)
            }
            JobMode::Async => {
                debug!(job = %self.name, "continuing asynchronously");
                Ok(Completion::Asynchronous(self.continue_async(ctx)))
            }
        }
    }
}

impl InterruptionTarget for JobRun {
    fn record_interruption(&self, causes: Vec<InterruptionCause>) {
        self.record.state.lock().causes.extend(causes);
    }
}

/// Continuation body that cancels a token when interrupted.
struct CancelOnInterrupt {
    token: CancellationToken,
}

impl AsynchronousBody for CancelOnInterrupt {
    fn interrupt(&self, for_shutdown: bool) {
        debug!(for_shutdown, "cancelling asynchronous job");
        self.token.cancel();
    }
}
