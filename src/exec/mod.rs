// src/exec/mod.rs

//! Execution slots.
//!
//! - [`executor`] holds [`Executor`], one worker thread running at most one
//!   task through its one-shot lifecycle.
//! - [`state`] is the lock-guarded state behind it and the [`SlotPhase`]s it
//!   moves through.
//! - [`asynchronous`] bridges tasks that keep running after the worker
//!   thread returns.
//! - [`context`] is the explicit "current executor" handle given to task
//!   bodies.
//! - [`diagnostics`] holds the settings and helpers behind progress,
//!   stuck detection and time formatting.

pub mod asynchronous;
pub mod context;
pub mod diagnostics;
pub mod executor;
pub mod state;

pub use asynchronous::{AsynchronousBody, AsynchronousExecution};
pub use context::{impersonating, on_behalf_of, ExecutionContext};
pub use diagnostics::{progress_percent, time_span_string, ExecutorSettings, StuckPolicy};
pub use executor::Executor;
pub use state::{CauseOfDeath, SlotPhase};
