// src/queue/work_queue.rs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::TaskError;
use crate::exec::{Executor, SlotPhase};
use crate::node::{Computer, Node};
use crate::queue::{BuildContext, Queue, RunContext, SubTask, WorkUnit};

/// FIFO scheduler handing work units to parked executors.
///
/// Semantics:
/// - `submit` appends a work unit and runs maintenance right away.
/// - Maintenance walks the pending units in order and starts the first parked
///   executor of an on-line, present node for each of them. An executor that
///   fails to start is skipped for the rest of the pass. It stops at the
///   first unit no executor can take, so order is preserved.
/// - A unit whose executor handed it back before committing (node went
///   off-line, executor died early) goes back to the front of the queue.
/// - The queue-wide lock is reentrant: maintenance holds it while starting
///   executors, and executors take it for their commit section.
pub struct WorkQueue {
    lock: ReentrantMutex<()>,
    pending: Mutex<VecDeque<Arc<WorkUnit>>>,
    assigned: Mutex<Vec<Assignment>>,
    nodes: RwLock<Vec<Weak<Node>>>,
    started: AtomicUsize,
    maintenance_runs: AtomicUsize,
}

/// A unit handed to an executor that has not committed to it yet.
struct Assignment {
    executor: Weak<Executor>,
    unit: Arc<WorkUnit>,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: ReentrantMutex::new(()),
            pending: Mutex::new(VecDeque::new()),
            assigned: Mutex::new(Vec::new()),
            nodes: RwLock::new(Vec::new()),
            started: AtomicUsize::new(0),
            maintenance_runs: AtomicUsize::new(0),
        })
    }

    /// Make `node`'s executors available to this queue.
    pub fn attach_node(&self, node: &Arc<Node>) {
        self.nodes.write().push(Arc::downgrade(node));
        debug!(node = %node.name(), "node attached to queue");
    }

    pub fn nodes(&self) -> Vec<Weak<Node>> {
        self.nodes.read().clone()
    }

    /// Queue `work` as a single-unit build and return its context.
    pub fn submit(&self, work: Arc<dyn SubTask>) -> Arc<BuildContext> {
        let context = BuildContext::new(work.display_name(), 1);
        let run_context: Arc<dyn RunContext> = context.clone();
        let unit = WorkUnit::new(work, run_context);
        self.submit_unit(unit);
        context
    }

    /// Queue a prepared work unit.
    pub fn submit_unit(&self, unit: Arc<WorkUnit>) {
        info!(work = %unit, "work unit queued");
        self.pending.lock().push_back(unit);
        self.maintain();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of executors that committed to a unit from this queue.
    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn maintenance_count(&self) -> usize {
        self.maintenance_runs.load(Ordering::SeqCst)
    }

    /// Drop every pending unit, aborting its build with `reason`.
    ///
    /// Returns how many units were dropped.
    pub fn clear(&self, reason: &str) -> usize {
        let _guard = self.lock.lock();
        let dropped: Vec<_> = self.pending.lock().drain(..).collect();
        for unit in &dropped {
            debug!(work = %unit, reason, "dropping pending work unit");
            unit.context.abort(&TaskError::failed(reason));
        }
        dropped.len()
    }

    /// Re-queue abandoned units and assign pending units to parked executors.
    pub fn maintain(&self) {
        let _guard = self.lock.lock();
        self.maintenance_runs.fetch_add(1, Ordering::SeqCst);

        self.requeue_abandoned();

        // Executors that refused a unit during this pass.
        let mut refused: Vec<Arc<Executor>> = Vec::new();
        loop {
            let Some(unit) = self.pending.lock().pop_front() else {
                break;
            };

            let Some(executor) = self.find_parked_executor(&refused) else {
                self.pending.lock().push_front(unit);
                break;
            };

            match executor.start(Arc::clone(&unit)) {
                Ok(()) => {
                    debug!(executor = %executor.name(), work = %unit, "work unit assigned");
                    self.assigned.lock().push(Assignment {
                        executor: Arc::downgrade(&executor),
                        unit,
                    });
                }
                Err(e) => {
                    warn!(executor = %executor.name(), error = %e, "failed to start executor");
                    self.pending.lock().push_front(unit);
                    refused.push(executor);
                }
            }
        }
    }

    fn requeue_abandoned(&self) {
        let mut abandoned = Vec::new();
        self.assigned.lock().retain(|assignment| {
            if assignment.unit.is_claimed() {
                return false;
            }
            let still_held = assignment.executor.upgrade().is_some_and(|executor| {
                executor.current_work_unit().is_some()
                    && executor.phase() != SlotPhase::Dead
            });
            if !still_held {
                abandoned.push(Arc::clone(&assignment.unit));
            }
            still_held
        });

        if abandoned.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        for unit in abandoned.into_iter().rev() {
            info!(work = %unit, "re-queueing work unit abandoned before commit");
            pending.push_front(unit);
        }
    }

    fn find_parked_executor(&self, skip: &[Arc<Executor>]) -> Option<Arc<Executor>> {
        self.nodes
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|node| node.is_online() && node.has_node())
            .find_map(|node| {
                node.executors()
                    .into_iter()
                    .find(|e| {
                        e.phase() == SlotPhase::Parked
                            && !skip.iter().any(|s| Arc::ptr_eq(s, e))
                    })
            })
    }
}

impl Queue for WorkQueue {
    fn with_lock(&self, critical: &mut dyn FnMut()) -> Result<(), TaskError> {
        let _guard = self.lock.lock();
        critical();
        Ok(())
    }

    fn on_start_executing(&self, executor: &Executor) {
        let started = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(executor = %executor.name(), started, "executor committed");
    }

    fn schedule_maintenance(&self) {
        self.maintain();
    }
}
