// src/node/pool.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::exec::{Executor, ExecutorSettings};
use crate::node::{Computer, TerminationRequest};
use crate::queue::{Executable, Queue};

/// A node with a fixed number of executor slots.
///
/// Slots are numbered `0..num_executors`. Whenever an executor is discarded
/// a fresh parked one takes its number, as long as the node is still present.
pub struct Node {
    name: String,
    num_executors: usize,
    online: AtomicBool,
    present: AtomicBool,
    connected_at: Mutex<Option<Instant>>,
    executors: RwLock<Vec<Arc<Executor>>>,
    terminated_by: Mutex<Vec<TerminationRequest>>,
    queue: Arc<dyn Queue>,
    settings: ExecutorSettings,
    this: Weak<Node>,
}

impl Node {
    /// Create an on-line node with `num_executors` parked executors.
    pub fn new(
        name: impl Into<String>,
        num_executors: usize,
        queue: Arc<dyn Queue>,
        settings: ExecutorSettings,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this: &Weak<Node>| {
            let owner: Weak<dyn Computer> = this.clone();
            let executors = (0..num_executors)
                .map(|number| {
                    Executor::new(owner.clone(), Arc::clone(&queue), number, settings.clone())
                })
                .collect();

            Self {
                connected_at: Mutex::new(Some(settings.clock.now())),
                name,
                num_executors,
                online: AtomicBool::new(true),
                present: AtomicBool::new(true),
                executors: RwLock::new(executors),
                terminated_by: Mutex::new(Vec::new()),
                queue,
                settings,
                this: this.clone(),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_executors(&self) -> usize {
        self.num_executors
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Snapshot of the current executors, ordered by number.
    pub fn executors(&self) -> Vec<Arc<Executor>> {
        self.executors.read().clone()
    }

    pub fn idle_executors(&self) -> Vec<Arc<Executor>> {
        self.executors()
            .into_iter()
            .filter(|e| e.is_idle())
            .collect()
    }

    /// The executor currently running `executable` on this node.
    pub fn executor_of(&self, executable: &Arc<dyn Executable>) -> Option<Arc<Executor>> {
        self.executors().into_iter().find(|e| {
            e.current_executable()
                .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(&current), Arc::as_ptr(executable)))
        })
    }

    /// Bring the node on-line (or take it off-line without a reason).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if online {
            *self.connected_at.lock() = Some(self.settings.clock.now());
            info!(node = %self.name, "node is on-line");
            self.queue.schedule_maintenance();
        } else {
            info!(node = %self.name, "node is off-line");
        }
    }

    /// Take the node off-line, recording who asked and why.
    pub fn disconnect(&self, reason: &str) {
        self.record_termination(reason);
        self.online.store(false, Ordering::SeqCst);
        warn!(node = %self.name, reason, "node disconnected");
    }

    /// Remove the node from the system. Executors that have not committed
    /// yet hand their work back; discarded executors are not replaced.
    pub fn remove_node(&self, reason: &str) {
        self.record_termination(reason);
        self.present.store(false, Ordering::SeqCst);
        self.online.store(false, Ordering::SeqCst);
        warn!(node = %self.name, reason, "node removed");
    }

    /// Interrupt every executor because the process is shutting down.
    pub fn interrupt_all_for_shutdown(&self) {
        for executor in self.executors() {
            executor.interrupt_for_shutdown();
        }
    }

    fn record_termination(&self, reason: &str) {
        let request = TerminationRequest::new(reason, self.settings.clock.now());
        self.terminated_by.lock().push(request);
    }

    fn owner_handle(&self) -> Weak<dyn Computer> {
        self.this.clone()
    }
}

impl Computer for Node {
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
        let removed = {
            let mut executors = self.executors.write();
            let Some(pos) = executors
                .iter()
                .position(|e| std::ptr::eq(Arc::as_ptr(e), executor))
            else {
                return;
            };
            let removed = executors.remove(pos);
            if self.has_node() {
                let fresh = Executor::new(
                    self.owner_handle(),
                    Arc::clone(&self.queue),
                    removed.number(),
                    self.settings.clone(),
                );
                executors.insert(pos, fresh);
            }
            removed
        };
        debug!(node = %self.name, executor = %removed.display_name(), "executor removed");
    }

    fn terminated_by(&self) -> Vec<TerminationRequest> {
        self.terminated_by.lock().clone()
    }

    fn connect_time(&self) -> Option<Instant> {
        *self.connected_at.lock()
    }
}
