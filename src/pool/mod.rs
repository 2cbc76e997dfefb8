//! The pool scheduler.
//!
//! [`PoolScheduler`] owns a fixed set of workers, each with one
//! [`StealableQueue`] and one [`AtomicFlag`]`<`[`WorkerState`]`>`.
//! Submissions are placed round-robin, admission-controlled against the
//! target worker's queue length, and rebalanced through stealing when a
//! worker starves. [`PoolScheduler::wait`] blocks until every accepted
//! item has finished.
//!
//! The pool-level waiting/running counters are updated exclusively through
//! atomic add/sub — never read-modify-write under a lock — keeping
//! submission and stealing lock-contention-free on the hot path.

pub mod work_item;
pub(crate) mod worker;

pub use work_item::{WorkItem, WorkPhase};
pub use worker::{WorkerId, WorkerState};

use crate::config::{PoolConfig, RejectPolicy};
use crate::error::PoolError;
use crate::queue::{Admission, StealableQueue};
use crate::sync::{AtomicFlag, ConcurrentSet};
use crate::time::DeferredTimer;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};
use worker::{Parker, Worker, WorkerCoordinator};

/// Default priority for [`PoolScheduler::queue_work_item`].
pub const DEFAULT_PRIORITY: u8 = 0;

/// Shared waiting/running counters and the drain condition.
///
/// `waiting + running` equals the number of live accepted items, modulo
/// the brief visibility window of one increment/decrement pair. The
/// running side of a hand-off is incremented before the waiting side is
/// decremented so the sum never spuriously reads zero.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    waiting: AtomicUsize,
    running: AtomicUsize,
    drain_mutex: Mutex<()>,
    drain_cond: Condvar,
}

impl PoolCounters {
    fn lock_unpoisoned(&self) -> std::sync::MutexGuard<'_, ()> {
        self.drain_mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Counts a submission before it becomes visible to any worker.
    pub(crate) fn record_submission(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
    }

    /// Moves one item from waiting to running.
    pub(crate) fn begin_run(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    /// Retires one running item, waking drain waiters on the last one.
    pub(crate) fn finish_run(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.notify_if_drained();
    }

    /// Un-counts a waiting item that was discarded without running.
    pub(crate) fn discard_waiting(&self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        self.notify_if_drained();
    }

    pub(crate) fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn is_drained(&self) -> bool {
        self.waiting() == 0 && self.running() == 0
    }

    fn notify_if_drained(&self) {
        if self.is_drained() {
            // Taking the mutex orders the notify after any waiter's check,
            // so the wakeup cannot be lost between its check and its wait.
            let _guard = self.lock_unpoisoned();
            self.drain_cond.notify_all();
        }
    }

    fn wait_drained(&self) {
        let mut guard = self.lock_unpoisoned();
        while !self.is_drained() {
            guard = self
                .drain_cond
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

/// A fixed-size pool of worker threads with stealable per-worker queues.
///
/// Dropping the pool shuts it down gracefully and joins the workers.
pub struct PoolScheduler {
    queues: Vec<StealableQueue>,
    flags: Vec<Arc<AtomicFlag<WorkerState>>>,
    coordinator: Arc<WorkerCoordinator>,
    counters: Arc<PoolCounters>,
    live: Arc<ConcurrentSet<WorkerId>>,
    handles: Vec<JoinHandle<()>>,
    next_seq: AtomicU64,
    next_worker: AtomicUsize,
    accepting: AtomicBool,
    reject: RejectPolicy,
    shutdown_timeout: Duration,
}

impl PoolScheduler {
    /// Builds the pool and starts its workers.
    ///
    /// Fails fast on invalid configuration, before any thread starts.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let worker_count = config.max_threads;

        let queues: Vec<StealableQueue> = (0..worker_count)
            .map(|_| StealableQueue::new(config.queue_type, config.enforce_queue_ownership))
            .collect();
        let flags: Vec<Arc<AtomicFlag<WorkerState>>> = (0..worker_count)
            .map(|_| Arc::new(AtomicFlag::new(WorkerState::Idle)))
            .collect();
        let parkers: Vec<Parker> = (0..worker_count).map(|_| Parker::new()).collect();
        let coordinator = Arc::new(WorkerCoordinator::new(parkers.clone(), flags.clone()));
        let counters = Arc::new(PoolCounters::default());
        let live = Arc::new(ConcurrentSet::new());

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            // Sibling stealers in round-robin order starting after self.
            let stealers = (1..worker_count)
                .map(|offset| queues[(id + offset) % worker_count].stealer())
                .collect();
            let mut worker = Worker {
                id,
                queue: queues[id].clone(),
                stealers,
                flag: Arc::clone(&flags[id]),
                parker: parkers[id].clone(),
                counters: Arc::clone(&counters),
            };
            let live_for_worker = Arc::clone(&live);
            let spawned = std::thread::Builder::new()
                .name(format!("stealpool-worker-{id}"))
                .spawn(move || {
                    live_for_worker.add(worker.id);
                    let _ = worker
                        .flag
                        .try_set(WorkerState::Fetching, Some(WorkerState::Idle));
                    worker.run_loop();
                    live_for_worker.remove(&worker.id);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    // Tear down the partial pool before reporting.
                    for flag in &flags {
                        flag.set(WorkerState::Disabled);
                    }
                    coordinator.wake_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn { source });
                }
            }
        }

        debug!(
            workers = worker_count,
            discipline = ?config.queue_type,
            "pool started"
        );

        Ok(Self {
            queues,
            flags,
            coordinator,
            counters,
            live,
            handles,
            next_seq: AtomicU64::new(0),
            next_worker: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            reject: config.reject_policy,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Submits an action at the default priority.
    ///
    /// Fire-and-forget: nothing is returned, and a submission discarded by
    /// the reject policy surfaces no error — its action is simply never
    /// invoked.
    pub fn queue_work_item(&self, action: impl FnOnce() + Send + 'static) {
        self.queue_work_item_with_priority(action, DEFAULT_PRIORITY);
    }

    /// Submits an action with an explicit priority (higher = more urgent).
    pub fn queue_work_item_with_priority(
        &self,
        action: impl FnOnce() + Send + 'static,
        priority: u8,
    ) {
        if !self.accepting.load(Ordering::SeqCst) {
            trace!("submission discarded: pool is shutting down");
            return;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let item = WorkItem::new(action, priority, seq);
        let target = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.queues.len();

        // Count before publication so the drain sum can never miss an
        // item a worker has already picked up.
        self.counters.record_submission();
        let admission = self.queues[target].push_bounded(
            item,
            self.reject.thread_queue_limit,
            self.reject.kind,
        );
        match admission {
            Admission::Accepted => self.coordinator.wake_one_idle(),
            Admission::AcceptedDisplacing(displaced) => {
                // The displaced item was counted when it was submitted.
                self.counters.discard_waiting();
                trace!(
                    worker = target,
                    seq = displaced.seq(),
                    "queued item displaced by backpressure policy"
                );
                self.coordinator.wake_one_idle();
            }
            Admission::Rejected(rejected) => {
                self.counters.discard_waiting();
                trace!(
                    worker = target,
                    seq = rejected.seq(),
                    "submission discarded by backpressure policy"
                );
            }
        }
    }

    /// Blocks until every accepted item has finished.
    ///
    /// Any item enqueued before this call observes drain-completion is
    /// awaited; items enqueued strictly afterwards may not be.
    pub fn wait(&self) {
        self.counters.wait_drained();
    }

    /// Number of accepted items not yet started. Lock-free, eventually
    /// consistent under concurrent mutation.
    #[must_use]
    pub fn waiting_work_count(&self) -> usize {
        self.counters.waiting()
    }

    /// Number of items currently executing. Lock-free, eventually
    /// consistent under concurrent mutation.
    #[must_use]
    pub fn running_work_count(&self) -> usize {
        self.counters.running()
    }

    /// Number of configured workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Identifiers of workers whose threads are currently running, in
    /// start order.
    #[must_use]
    pub fn live_workers(&self) -> Vec<WorkerId> {
        self.live.snapshot()
    }

    /// Stops accepting work and joins the workers.
    ///
    /// Workers drain their local queues first (graceful path). Stragglers
    /// are forced to stop after their in-flight item once the configured
    /// grace period elapses; a shutdown that completes sooner cancels the
    /// force, and the version guard makes that race harmless. Items still
    /// queued after a forced stop are discarded and un-counted so drain
    /// waiters observe completion. Idempotent.
    pub fn shutdown(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        if self.handles.is_empty() {
            return;
        }
        debug!("pool shutdown requested");
        self.request_disable();
        self.coordinator.wake_all();

        let flags = self.flags.clone();
        let coordinator = Arc::clone(&self.coordinator);
        let force = DeferredTimer::new(move || {
            debug!("shutdown grace period elapsed; forcing workers to stop");
            for flag in &flags {
                let _ = flag.try_set(WorkerState::Disabled, Some(WorkerState::ToBeDisabled));
            }
            coordinator.wake_all();
        });
        force.set(self.shutdown_timeout);

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        force.cancel();
        drop(force);

        for queue in &self.queues {
            for item in queue.drain() {
                trace!(seq = item.seq(), "undrained work item discarded at shutdown");
                self.counters.discard_waiting();
            }
        }
        debug!("pool shutdown complete");
    }

    /// Transitions every worker to `ToBeDisabled` through the flag CAS,
    /// from whatever state the worker is observed in.
    fn request_disable(&self) {
        for flag in &self.flags {
            loop {
                match flag.get() {
                    None | Some(WorkerState::Disabled | WorkerState::ToBeDisabled) => break,
                    Some(current) => {
                        if flag
                            .try_set(WorkerState::ToBeDisabled, Some(current))
                            .0
                        {
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for PoolScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolScheduler")
            .field("workers", &self.queues.len())
            .field("waiting", &self.waiting_work_count())
            .field("running", &self.running_work_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueDiscipline, RejectKind};
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Instant;

    fn pool_with(config: PoolConfig) -> PoolScheduler {
        PoolScheduler::new(config).expect("pool should start")
    }

    fn small_pool(max_threads: usize) -> PoolScheduler {
        pool_with(PoolConfig {
            max_threads,
            ..PoolConfig::default()
        })
    }

    /// Blocks a worker until the returned gate is opened.
    fn gated_action(gate: &Arc<AtomicBool>) -> impl FnOnce() + Send + 'static {
        let gate = Arc::clone(gate);
        move || {
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Waits until `expected` items are running, so later submissions
    /// cannot race the pickup of the gated blockers.
    fn wait_for_running(pool: &PoolScheduler, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.running_work_count() < expected {
            assert!(
                Instant::now() < deadline,
                "workers should pick up the gated items"
            );
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn executes_all_submitted_items() {
        let pool = small_pool(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.queue_work_item(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
        assert_eq!(pool.waiting_work_count(), 0);
        assert_eq!(pool.running_work_count(), 0);
    }

    #[test]
    fn wait_returns_immediately_on_an_empty_pool() {
        let pool = small_pool(2);
        let start = Instant::now();
        pool.wait();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn single_worker_pops_in_priority_then_sequence_order() {
        let pool = small_pool(1);
        let gate = Arc::new(AtomicBool::new(false));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Occupy the worker so the rest queue up behind the gate.
        pool.queue_work_item(gated_action(&gate));
        wait_for_running(&pool, 1);

        for priority in [1u8, 5, 3, 5] {
            let order = Arc::clone(&order);
            pool.queue_work_item_with_priority(
                move || {
                    order.lock().push(priority);
                },
                priority,
            );
        }
        gate.store(true, Ordering::SeqCst);
        pool.wait();

        assert_eq!(
            *order.lock(),
            vec![5, 5, 3, 1],
            "priority descending, submission order among equals"
        );
    }

    #[test]
    fn panic_is_contained_and_the_pool_keeps_working() {
        let pool = small_pool(2);
        pool.queue_work_item(|| panic!("deliberate test panic"));
        pool.wait();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_inner = Arc::clone(&ran);
        pool.queue_work_item(move || {
            ran_inner.store(true, Ordering::SeqCst);
        });
        pool.wait();
        assert!(
            ran.load(Ordering::SeqCst),
            "a panicked item must not take the pool down"
        );
        assert_eq!(pool.live_workers().len(), 2, "workers survive panics");
    }

    #[test]
    fn discard_incoming_drops_the_new_item() {
        let pool = pool_with(PoolConfig {
            max_threads: 1,
            reject_policy: RejectPolicy {
                kind: RejectKind::DiscardIncoming,
                thread_queue_limit: 1,
            },
            ..PoolConfig::default()
        });
        let gate = Arc::new(AtomicBool::new(false));
        pool.queue_work_item(gated_action(&gate));
        wait_for_running(&pool, 1);

        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let first_inner = Arc::clone(&first);
        let second_inner = Arc::clone(&second);
        pool.queue_work_item(move || first_inner.store(true, Ordering::SeqCst));
        pool.queue_work_item(move || second_inner.store(true, Ordering::SeqCst));

        assert_eq!(pool.waiting_work_count(), 1, "queue holds only the first");
        gate.store(true, Ordering::SeqCst);
        pool.wait();

        assert!(first.load(Ordering::SeqCst), "queued item runs");
        assert!(
            !second.load(Ordering::SeqCst),
            "incoming item beyond the limit is silently discarded"
        );
    }

    #[test]
    fn discard_queued_displaces_and_admits_the_new_item() {
        let pool = pool_with(PoolConfig {
            max_threads: 1,
            reject_policy: RejectPolicy {
                kind: RejectKind::DiscardQueued,
                thread_queue_limit: 1,
            },
            ..PoolConfig::default()
        });
        let gate = Arc::new(AtomicBool::new(false));
        pool.queue_work_item(gated_action(&gate));
        wait_for_running(&pool, 1);

        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let first_inner = Arc::clone(&first);
        let second_inner = Arc::clone(&second);
        pool.queue_work_item(move || first_inner.store(true, Ordering::SeqCst));
        pool.queue_work_item(move || second_inner.store(true, Ordering::SeqCst));

        assert_eq!(pool.waiting_work_count(), 1, "net queue length unchanged");
        gate.store(true, Ordering::SeqCst);
        pool.wait();

        assert!(
            !first.load(Ordering::SeqCst),
            "displaced queued item never runs"
        );
        assert!(second.load(Ordering::SeqCst), "new item is admitted and runs");
    }

    #[test]
    fn sibling_steals_when_the_owner_is_busy() {
        let pool = small_pool(2);
        let gates = [
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        ];
        // Occupy both workers.
        pool.queue_work_item(gated_action(&gates[0]));
        pool.queue_work_item(gated_action(&gates[1]));
        wait_for_running(&pool, 2);

        // Lands on worker 0's queue, whose owner stays busy.
        let ran = Arc::new(AtomicBool::new(false));
        let ran_inner = Arc::clone(&ran);
        pool.queue_work_item(move || ran_inner.store(true, Ordering::SeqCst));

        // Free only worker 1; it must steal the item from worker 0.
        gates[1].store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !ran.load(Ordering::SeqCst) {
            assert!(
                Instant::now() < deadline,
                "item on a busy worker's queue should be stolen by its idle sibling"
            );
            thread::sleep(Duration::from_millis(5));
        }

        gates[0].store(true, Ordering::SeqCst);
        pool.wait();
    }

    #[test]
    fn ownership_enforcement_disables_stealing_pool_wide() {
        let pool = pool_with(PoolConfig {
            max_threads: 2,
            enforce_queue_ownership: true,
            ..PoolConfig::default()
        });
        let gates = [
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        ];
        pool.queue_work_item(gated_action(&gates[0]));
        pool.queue_work_item(gated_action(&gates[1]));
        wait_for_running(&pool, 2);

        let ran = Arc::new(AtomicBool::new(false));
        let ran_inner = Arc::clone(&ran);
        pool.queue_work_item(move || ran_inner.store(true, Ordering::SeqCst));

        // Worker 1 goes idle but must not be able to steal worker 0's item.
        gates[1].store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert!(
            !ran.load(Ordering::SeqCst),
            "an owner-only queue must never be stolen from"
        );

        // The owner eventually runs it.
        gates[0].store(true, Ordering::SeqCst);
        pool.wait();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn live_workers_tracks_thread_lifetimes() {
        let mut pool = small_pool(3);
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.live_workers().len() < 3 {
            assert!(Instant::now() < deadline, "workers should come up");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.worker_count(), 3);

        pool.shutdown();
        assert!(
            pool.live_workers().is_empty(),
            "no worker threads survive shutdown"
        );
    }

    #[test]
    fn shutdown_is_graceful_and_idempotent() {
        let mut pool = small_pool(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.queue_work_item(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 16);

        // Submissions after shutdown are silently discarded.
        let late = Arc::new(AtomicBool::new(false));
        let late_inner = Arc::clone(&late);
        pool.queue_work_item(move || late_inner.store(true, Ordering::SeqCst));
        pool.wait();
        assert!(!late.load(Ordering::SeqCst));
    }

    #[test]
    fn forced_shutdown_discards_undrained_items() {
        let mut pool = pool_with(PoolConfig {
            max_threads: 1,
            shutdown_timeout: Duration::from_millis(20),
            ..PoolConfig::default()
        });
        let gate = Arc::new(AtomicBool::new(false));
        pool.queue_work_item(gated_action(&gate));
        wait_for_running(&pool, 1);

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            pool.queue_work_item(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Open the gate only after the grace period has elapsed: the
        // worker is forced to Disabled and must skip the drain.
        let opener = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                gate.store(true, Ordering::SeqCst);
            })
        };
        pool.shutdown();
        opener.join().expect("gate opener join");

        assert_eq!(
            ran.load(Ordering::SeqCst),
            0,
            "items queued behind a forced stop are discarded"
        );
        assert_eq!(pool.waiting_work_count(), 0, "discards are un-counted");
        pool.wait();
    }

    #[test]
    fn graceful_shutdown_drains_local_queues() {
        let mut pool = pool_with(PoolConfig {
            max_threads: 1,
            shutdown_timeout: Duration::from_secs(5),
            ..PoolConfig::default()
        });
        let gate = Arc::new(AtomicBool::new(false));
        pool.queue_work_item(gated_action(&gate));
        wait_for_running(&pool, 1);

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            pool.queue_work_item(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Open the gate well inside the grace period: the worker drains
        // its queue before exiting.
        let opener = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                gate.store(true, Ordering::SeqCst);
            })
        };
        pool.shutdown();
        opener.join().expect("gate opener join");

        assert_eq!(
            ran.load(Ordering::SeqCst),
            3,
            "a graceful stop finishes everything already queued"
        );
    }

    #[test]
    fn counters_move_items_from_waiting_to_running() {
        let pool = small_pool(1);
        let gate = Arc::new(AtomicBool::new(false));
        pool.queue_work_item(gated_action(&gate));

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.running_work_count() != 1 {
            assert!(Instant::now() < deadline, "item should start running");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.waiting_work_count(), 0);

        gate.store(true, Ordering::SeqCst);
        pool.wait();
        assert_eq!(pool.running_work_count(), 0);
    }
}
