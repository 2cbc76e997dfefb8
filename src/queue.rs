//! Per-worker stealable priority queues.
//!
//! One unified container backs all three queuing disciplines. Items are
//! kept in one total order — priority descending, then submission sequence
//! ascending — and the disciplines differ only in which *end* of that
//! order each side of the contract touches:
//!
//! | Discipline | Owner local push/pop | Stealer access |
//! |------------|----------------------|----------------|
//! | Fifo       | head                 | tail           |
//! | Stack      | head                 | tail           |
//! | Deque      | either end           | end opposite the owner's most recent local operation |
//!
//! The queue is single-owner, multi-stealer: exactly one local-operation
//! caller (the owning worker) concurrently with any number of stealing
//! callers. A per-queue `parking_lot::Mutex` enforces exactly-once
//! delivery — an item reaches exactly one of `local_pop`/`steal`. No lock
//! is ever shared between two queues.
//!
//! An owner-only flag fixed at construction turns off stealing entirely:
//! `steal` then reports empty regardless of contents and the queue is
//! strictly private to its owner.

use crate::config::{QueueDiscipline, RejectKind};
use crate::pool::work_item::WorkItem;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Total order key: priority descending, then sequence ascending.
///
/// The head of a queue is the smallest key — the most urgent item, oldest
/// among equals. The tie-break is identical across all disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderKey {
    priority: u8,
    seq: u64,
}

impl Ord for OrderKey {
    #[inline]
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority sorts first; equal priorities fall back to
        // earlier submission sequence.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for OrderKey {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Head,
    Tail,
}

impl End {
    #[inline]
    fn opposite(self) -> Self {
        match self {
            Self::Head => Self::Tail,
            Self::Tail => Self::Head,
        }
    }
}

#[derive(Debug)]
struct QueueInner {
    items: BTreeMap<OrderKey, WorkItem>,
    /// End touched by the owner's most recent local operation. Stealers
    /// against a deque take the opposite end.
    last_local: End,
}

impl QueueInner {
    fn pop_end(&mut self, end: End) -> Option<WorkItem> {
        let entry = match end {
            End::Head => self.items.pop_first(),
            End::Tail => self.items.pop_last(),
        };
        entry.map(|(_, item)| item)
    }
}

/// Outcome of an admission-controlled push.
#[derive(Debug)]
pub enum Admission {
    /// The queue was under its limit; the item is queued.
    Accepted,
    /// The queue was at its limit; the new item is queued and the returned
    /// (least-urgent) previously queued item was displaced.
    AcceptedDisplacing(WorkItem),
    /// The queue was at its limit; the new item is returned untouched.
    Rejected(WorkItem),
}

/// A per-worker concurrent priority container with cross-worker stealing.
///
/// Cloning shares the underlying queue; the clone is a handle, not a copy.
/// Local operations are reserved to the owning worker by convention (the
/// internal mutex keeps violations safe rather than undefined).
#[derive(Debug, Clone)]
pub struct StealableQueue {
    discipline: QueueDiscipline,
    owner_only: bool,
    inner: Arc<Mutex<QueueInner>>,
    len: Arc<AtomicUsize>,
}

impl StealableQueue {
    /// Creates an empty queue with the given discipline.
    ///
    /// `owner_only` is fixed for the queue's lifetime; when set, stealers
    /// always observe an empty queue.
    #[must_use]
    pub fn new(discipline: QueueDiscipline, owner_only: bool) -> Self {
        Self {
            discipline,
            owner_only,
            inner: Arc::new(Mutex::new(QueueInner {
                items: BTreeMap::new(),
                last_local: End::Head,
            })),
            len: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The discipline fixed at construction.
    #[must_use]
    pub fn discipline(&self) -> QueueDiscipline {
        self.discipline
    }

    /// Whether stealing is disabled for this queue.
    #[must_use]
    pub fn is_owner_only(&self) -> bool {
        self.owner_only
    }

    /// Owner-side insert. Never blocks on other queues.
    pub fn local_push(&self, item: WorkItem) {
        let mut inner = self.inner.lock();
        inner.items.insert(key_of(&item), item);
        inner.last_local = End::Head;
        self.len.fetch_add(1, Ordering::SeqCst);
    }

    /// Owner-side batch insert under one lock acquisition.
    pub fn local_push_many(&self, items: impl IntoIterator<Item = WorkItem>) {
        let mut inner = self.inner.lock();
        let mut pushed = 0usize;
        for item in items {
            inner.items.insert(key_of(&item), item);
            pushed += 1;
        }
        if pushed > 0 {
            inner.last_local = End::Head;
            self.len.fetch_add(pushed, Ordering::SeqCst);
        }
    }

    /// Admission-controlled insert, applied atomically under the queue
    /// lock so the length check and the insert cannot interleave with a
    /// concurrent submission.
    pub fn push_bounded(&self, item: WorkItem, limit: usize, kind: RejectKind) -> Admission {
        let mut inner = self.inner.lock();
        if inner.items.len() < limit {
            inner.items.insert(key_of(&item), item);
            inner.last_local = End::Head;
            self.len.fetch_add(1, Ordering::SeqCst);
            return Admission::Accepted;
        }
        match kind {
            RejectKind::DiscardQueued => {
                // Displace the least-urgent queued item (tail of the
                // priority order; newest among equals) to admit the new
                // one. Net queue length is unchanged.
                match inner.pop_end(End::Tail) {
                    Some(displaced) => {
                        inner.items.insert(key_of(&item), item);
                        inner.last_local = End::Head;
                        Admission::AcceptedDisplacing(displaced)
                    }
                    // A zero limit leaves nothing to displace.
                    None => Admission::Rejected(item),
                }
            }
            RejectKind::DiscardIncoming => Admission::Rejected(item),
        }
    }

    /// Owner-side removal at the discipline's working end.
    ///
    /// Returns `None` when the queue is empty; never blocks the caller
    /// beyond the queue's own mutex.
    #[must_use]
    pub fn local_pop(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock();
        let item = inner.pop_end(End::Head);
        if item.is_some() {
            inner.last_local = End::Head;
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Owner-side removal at the deque's far end.
    ///
    /// For the non-deque disciplines the owner end is pinned to the head,
    /// so this is equivalent to [`StealableQueue::local_pop`].
    #[must_use]
    pub fn local_pop_back(&self) -> Option<WorkItem> {
        if self.discipline != QueueDiscipline::Deque {
            return self.local_pop();
        }
        let mut inner = self.inner.lock();
        let item = inner.pop_end(End::Tail);
        if item.is_some() {
            inner.last_local = End::Tail;
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Removes and returns everything, head first.
    pub fn drain(&self) -> Vec<WorkItem> {
        let mut inner = self.inner.lock();
        let items = std::mem::take(&mut inner.items);
        self.len.store(0, Ordering::SeqCst);
        items.into_values().collect()
    }

    /// Eventually consistent length: may be stale under concurrent
    /// mutation but is never negative and never understates a monotonic
    /// drain to zero (updates happen inside the queue lock).
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// Returns whether the queue currently reads empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a stealing handle for this queue.
    #[must_use]
    pub fn stealer(&self) -> Stealer {
        Stealer {
            discipline: self.discipline,
            owner_only: self.owner_only,
            inner: Arc::clone(&self.inner),
            len: Arc::clone(&self.len),
        }
    }
}

/// A handle to steal items from a [`StealableQueue`].
#[derive(Debug, Clone)]
pub struct Stealer {
    discipline: QueueDiscipline,
    owner_only: bool,
    inner: Arc<Mutex<QueueInner>>,
    len: Arc<AtomicUsize>,
}

impl Stealer {
    /// Non-owner removal from the discipline's steal end.
    ///
    /// Returns `None` on an empty queue, and unconditionally `None` when
    /// the queue was constructed owner-only — the queue is then strictly
    /// private regardless of contents.
    #[must_use]
    pub fn steal(&self) -> Option<WorkItem> {
        if self.owner_only {
            return None;
        }
        let mut inner = self.inner.lock();
        let end = match self.discipline {
            QueueDiscipline::Fifo | QueueDiscipline::Stack => End::Tail,
            QueueDiscipline::Deque => inner.last_local.opposite(),
        };
        let item = inner.pop_end(end);
        if item.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }
}

#[inline]
fn key_of(item: &WorkItem) -> OrderKey {
    OrderKey {
        priority: item.priority(),
        seq: item.seq(),
    }
}
