// src/interrupt/mod.rs

//! Why an execution was interrupted.
//!
//! - [`cause`] holds the [`InterruptionCause`] value type and the
//!   order-preserving, deduplicating [`CauseSet`] executors accumulate.
//! - [`InterruptionTarget`] is implemented by whatever record should keep the
//!   causes once an executor drains them.

pub mod cause;

pub use cause::{CauseKind, CauseSet, InterruptionCause};

/// Receiver of drained interruption causes (typically a build record).
pub trait InterruptionTarget {
    fn record_interruption(&self, causes: Vec<InterruptionCause>);
}
