//! Worker thread logic.
//!
//! Each worker owns one [`StealableQueue`] and one
//! [`AtomicFlag`]`<`[`WorkerState`]`>`. The flag is the only mutation path
//! for worker activity state; every transition goes through
//! [`AtomicFlag::try_set`], including the disable handshake driven by the
//! scheduler.

use crate::pool::PoolCounters;
use crate::pool::work_item::WorkItem;
use crate::queue::{StealableQueue, Stealer};
use crate::sync::{AtomicFlag, FlagValue};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Identifier for a pool worker.
pub type WorkerId = usize;

/// Activity state of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Parked; no work anywhere.
    Idle,
    /// Looking for work (own queue, then siblings).
    Fetching,
    /// Executing a work item.
    Running,
    /// Exited, or told to stop without draining.
    Disabled,
    /// Told to stop after draining its local queue.
    ToBeDisabled,
}

impl FlagValue for WorkerState {
    fn into_raw(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Fetching => 1,
            Self::Running => 2,
            Self::Disabled => 3,
            Self::ToBeDisabled => 4,
        }
    }

    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Idle),
            1 => Some(Self::Fetching),
            2 => Some(Self::Running),
            3 => Some(Self::Disabled),
            4 => Some(Self::ToBeDisabled),
            _ => None,
        }
    }
}

/// A worker thread that executes work items.
pub(crate) struct Worker {
    /// Unique worker ID.
    pub(crate) id: WorkerId,
    /// This worker's own queue.
    pub(crate) queue: StealableQueue,
    /// Stealers for sibling queues, in round-robin order starting after
    /// this worker's own slot.
    pub(crate) stealers: Vec<Stealer>,
    /// Activity state; the sole mutation point for worker state.
    pub(crate) flag: Arc<AtomicFlag<WorkerState>>,
    /// Parking mechanism for idle waiting.
    pub(crate) parker: Parker,
    /// Shared waiting/running counters and drain condition.
    pub(crate) counters: Arc<PoolCounters>,
}

impl Worker {
    /// Runs the worker scheduling loop.
    pub(crate) fn run_loop(&mut self) {
        const SPIN_LIMIT: u32 = 64;
        const YIELD_LIMIT: u32 = 16;

        debug!(worker_id = self.id, "worker started");

        'outer: loop {
            match self.flag.get() {
                Some(WorkerState::Disabled) | None => break,
                Some(WorkerState::ToBeDisabled) => {
                    self.drain_local();
                    break;
                }
                _ => {}
            }

            // 1. Own queue first.
            if let Some(item) = self.queue.local_pop() {
                self.execute(item);
                continue;
            }

            // 2. Steal from siblings in round-robin order.
            if let Some(item) = self.steal_from_siblings() {
                self.execute(item);
                continue;
            }

            // 3. Backoff before parking: spin, then yield, then park. The
            // park uses a short timeout so a disable request is observed
            // even if no explicit unpark is delivered while parked.
            let mut backoff = 0u32;
            loop {
                if self.flag.get() != Some(WorkerState::Fetching) {
                    continue 'outer;
                }
                if let Some(item) = self
                    .queue
                    .local_pop()
                    .or_else(|| self.steal_from_siblings())
                {
                    self.execute(item);
                    break;
                }
                if backoff < SPIN_LIMIT {
                    std::hint::spin_loop();
                    backoff += 1;
                } else if backoff < SPIN_LIMIT + YIELD_LIMIT {
                    thread::yield_now();
                    backoff += 1;
                } else {
                    let (went_idle, _) = self
                        .flag
                        .try_set(WorkerState::Idle, Some(WorkerState::Fetching));
                    if went_idle {
                        self.parker.park_timeout(Duration::from_millis(1));
                        let _ = self
                            .flag
                            .try_set(WorkerState::Fetching, Some(WorkerState::Idle));
                    }
                    break;
                }
            }
        }

        let _ = self
            .flag
            .try_set(WorkerState::Disabled, Some(WorkerState::ToBeDisabled));
        debug!(worker_id = self.id, "worker exited");
    }

    /// Executes one item, containing any panic to this worker.
    fn execute(&self, mut item: WorkItem) {
        let _ = self
            .flag
            .try_set(WorkerState::Running, Some(WorkerState::Fetching));
        self.counters.begin_run();
        trace!(worker_id = self.id, seq = item.seq(), "executing work item");

        if !item.run() {
            error!(
                worker_id = self.id,
                seq = item.seq(),
                panic = item.panic_message().unwrap_or("unknown"),
                "work item panicked; failure contained to this worker"
            );
        }

        self.counters.finish_run();
        let _ = self
            .flag
            .try_set(WorkerState::Fetching, Some(WorkerState::Running));
    }

    /// Finishes locally queued work on the graceful disable path.
    ///
    /// A forced disable arriving mid-drain stops the drain after the
    /// in-flight item.
    fn drain_local(&self) {
        while *self.flag == WorkerState::ToBeDisabled {
            match self.queue.local_pop() {
                Some(item) => self.execute(item),
                None => break,
            }
        }
    }

    fn steal_from_siblings(&self) -> Option<WorkItem> {
        self.stealers.iter().find_map(Stealer::steal)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Targeted wakeups for idle workers.
///
/// A successful submission wakes at most one idle worker; waking everyone
/// on every push would stampede the parkers for no benefit.
#[derive(Debug)]
pub(crate) struct WorkerCoordinator {
    parkers: Vec<Parker>,
    flags: Vec<Arc<AtomicFlag<WorkerState>>>,
    next_wake: AtomicUsize,
}

impl WorkerCoordinator {
    pub(crate) fn new(parkers: Vec<Parker>, flags: Vec<Arc<AtomicFlag<WorkerState>>>) -> Self {
        debug_assert_eq!(parkers.len(), flags.len());
        Self {
            parkers,
            flags,
            next_wake: AtomicUsize::new(0),
        }
    }

    /// Unparks the first idle worker found, scanning from a rotating
    /// cursor. Active workers are left alone — they will find the work on
    /// their next fetch.
    pub(crate) fn wake_one_idle(&self) {
        let count = self.parkers.len();
        if count == 0 {
            return;
        }
        let start = self.next_wake.fetch_add(1, Ordering::Relaxed);
        for offset in 0..count {
            let slot = (start + offset) % count;
            if *self.flags[slot] == WorkerState::Idle {
                self.parkers[slot].unpark();
                return;
            }
        }
    }

    /// Unparks every worker.
    pub(crate) fn wake_all(&self) {
        for parker in &self.parkers {
            parker.unpark();
        }
    }
}

#[derive(Debug)]
struct ParkerInner {
    notified: AtomicBool,
    mutex: Mutex<()>,
    cvar: Condvar,
}

/// A mechanism for parking and unparking a worker.
///
/// Permit semantics: an unpark delivered before the park is consumed by
/// the next park instead of being lost.
#[derive(Debug, Clone)]
pub(crate) struct Parker {
    inner: Arc<ParkerInner>,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ParkerInner {
                notified: AtomicBool::new(false),
                mutex: Mutex::new(()),
                cvar: Condvar::new(),
            }),
        }
    }

    #[inline]
    fn lock_unpoisoned(&self) -> std::sync::MutexGuard<'_, ()> {
        self.inner
            .mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[inline]
    fn consume_permit(&self) -> bool {
        self.inner
            .notified
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Parks the current thread until notified.
    #[allow(dead_code)]
    pub(crate) fn park(&self) {
        if self.consume_permit() {
            return;
        }
        let mut guard = self.lock_unpoisoned();
        while !self.consume_permit() {
            guard = self
                .inner
                .cvar
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        drop(guard);
    }

    /// Parks the current thread until notified or the timeout elapses.
    pub(crate) fn park_timeout(&self, duration: Duration) {
        if self.consume_permit() || duration.is_zero() {
            return;
        }
        let (guard, _timed_out) = self
            .inner
            .cvar
            .wait_timeout_while(self.lock_unpoisoned(), duration, |()| !self.consume_permit())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        drop(guard);
    }

    /// Unparks a parked thread, or stores a permit for the next park.
    pub(crate) fn unpark(&self) {
        if self
            .inner
            .notified
            .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            // Permit already pending; the next park consumes it.
            return;
        }
        // The permit is published. Take the mutex before signaling so a
        // thread between its permit check and its wait cannot miss the
        // notification.
        let _guard = self.lock_unpoisoned();
        self.inner.cvar.notify_one();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}
