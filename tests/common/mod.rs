#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use buildexec::clock::MockClock;
use buildexec::exec::{Executor, ExecutorSettings};

pub use buildexec_test_utils::{init_tracing, wait_until};

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Executor settings driven by `clock`.
pub fn mock_settings(clock: &MockClock) -> ExecutorSettings {
    ExecutorSettings::with_clock(Arc::new(clock.clone()))
}

/// Wait until the executor's run is fully over: worker thread gone and
/// maintenance scheduled.
pub fn wait_finished(executor: &Executor) -> bool {
    wait_until(TIMEOUT, || executor.phase().is_terminal() && !executor.is_active())
}
