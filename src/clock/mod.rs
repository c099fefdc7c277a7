// src/clock/mod.rs

//! Time source used by executors for elapsed/progress/stuck computations.
//!
//! Production code uses [`SystemClock`]; tests swap in [`mock::MockClock`] so
//! "25 hours elapsed" does not mean waiting 25 hours.

use std::fmt::Debug;
use std::time::Instant;

pub mod mock;

pub use mock::MockClock;

/// Abstract monotonic clock.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Implementation backed by `std::time::Instant::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
