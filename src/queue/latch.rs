// src/queue/latch.rs

//! N-party rendezvous used to line up the work units of one build.

use parking_lot::{Condvar, Mutex};

use crate::errors::TaskError;

/// Blocks each arriving party until all `parties` have arrived, or until the
/// latch is aborted.
#[derive(Debug)]
pub struct Latch {
    parties: usize,
    state: Mutex<LatchState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct LatchState {
    arrived: usize,
    aborted: Option<String>,
}

impl Latch {
    pub fn new(parties: usize) -> Self {
        Self {
            parties: parties.max(1),
            state: Mutex::new(LatchState::default()),
            cond: Condvar::new(),
        }
    }

    /// Arrive and wait for the others.
    ///
    /// Returns `Err(TaskError::Interrupted)` if the latch was aborted before
    /// or while waiting.
    pub fn synchronize(&self) -> Result<(), TaskError> {
        let mut state = self.state.lock();
        if state.aborted.is_some() {
            return Err(TaskError::Interrupted);
        }

        state.arrived += 1;
        if state.arrived >= self.parties {
            self.cond.notify_all();
            return Ok(());
        }

        while state.arrived < self.parties {
            if state.aborted.is_some() {
                return Err(TaskError::Interrupted);
            }
            self.cond.wait(&mut state);
        }
        Ok(())
    }

    /// Release every waiter with an error. The first reason wins.
    pub fn abort(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.aborted.is_none() {
            state.aborted = Some(reason.to_string());
        }
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted.is_some()
    }

    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }
}
