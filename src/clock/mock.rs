// src/clock/mock.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::Clock;

/// Manually advanced clock.
///
/// Clones share the same offset, so a test can keep one handle and hand
/// another to the executors it drives.
#[derive(Debug, Clone)]
pub struct MockClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }

    /// Total time advanced since creation.
    pub fn offset(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
