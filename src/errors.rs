// src/errors.rs

//! Crate-wide error types.
//!
//! - [`BuildExecError`] covers configuration problems and executor
//!   precondition violations (double start, unwinding after commit, ...).
//! - [`TaskError`] is what a running task reports back to its executor.
//!   It flows into the build's shared context through `finish1`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildExecError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// `start` was called on an executor that already ran (or was disposed).
    #[error("{executor} was already started or has terminated")]
    AlreadyStarted { executor: String },

    /// The work unit can no longer be unwound once its executable exists.
    #[error("{executor} cannot reset its work unit after the executable has been created")]
    ExecutableAlreadyCreated { executor: String },

    /// Only inactive (dead or finished) executors may be yanked.
    #[error("can't yank a live executor: {executor}")]
    ExecutorActive { executor: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BuildExecError>;

/// Failure reported by a task body (or by the build context on its behalf).
#[derive(Error, Debug)]
pub enum TaskError {
    /// The executor's cooperative stop signal was observed.
    #[error("interrupted")]
    Interrupted,

    /// The task body panicked; the payload message is kept for the record.
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl TaskError {
    /// True for the expected, cooperative cancellation path.
    pub fn is_interruption(&self) -> bool {
        matches!(self, TaskError::Interrupted)
    }

    /// Build a `Failed` error from a plain message.
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(anyhow::anyhow!(msg.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Extract a readable message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
