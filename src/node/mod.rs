// src/node/mod.rs

//! Owner side of executors: the node (computer) a slot belongs to.
//!
//! Executors only talk to their owner through [`Computer`], so tests can
//! swap in a fake. [`Node`] is the stock implementation with a fixed number
//! of slots that refills itself as executors are discarded.

pub mod pool;

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::exec::Executor;
use crate::queue::Executable;

pub use pool::Node;

/// Record of a request to take a node off-line or remove it.
///
/// Executors that abandon or finish a run after such a request log these so
/// the operator can see who pulled the node away.
#[derive(Debug, Clone)]
pub struct TerminationRequest {
    reason: String,
    requested_at: Instant,
    trace: String,
}

impl TerminationRequest {
    pub fn new(reason: impl Into<String>, requested_at: Instant) -> Self {
        Self {
            reason: reason.into(),
            requested_at,
            trace: Backtrace::capture().to_string(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn requested_at(&self) -> Instant {
        self.requested_at
    }

    /// Backtrace of the requesting call, if backtraces are enabled.
    pub fn trace(&self) -> &str {
        &self.trace
    }
}

impl fmt::Display for TerminationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "termination requested: {}", self.reason)?;
        if !self.trace.is_empty() && self.trace != "disabled backtrace" {
            write!(f, "\n{}", self.trace)?;
        }
        Ok(())
    }
}

/// The machine an executor runs on, as seen by the executor.
pub trait Computer: Send + Sync {
    fn display_name(&self) -> String;

    fn is_online(&self) -> bool;

    /// False once the node was removed from the system.
    fn has_node(&self) -> bool;

    /// Discard `executor`. Called when it finished, was yanked, or was
    /// disposed before starting.
    fn remove_executor(&self, executor: &Executor);

    /// Outstanding termination requests, oldest first.
    fn terminated_by(&self) -> Vec<TerminationRequest>;

    /// When the node last came on-line, if known.
    fn connect_time(&self) -> Option<Instant> {
        None
    }
}

/// Find the executor currently running `executable` across `nodes`.
pub fn find_executor(
    nodes: &[Weak<Node>],
    executable: &Arc<dyn Executable>,
) -> Option<Arc<Executor>> {
    nodes
        .iter()
        .filter_map(Weak::upgrade)
        .find_map(|node| node.executor_of(executable))
}
