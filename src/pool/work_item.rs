//! Work item records.
//!
//! A [`WorkItem`] is one unit of submitted work: an opaque niladic action,
//! a priority, a monotonic submission sequence number, and a lifecycle
//! phase. Exactly one queue slot or one executing worker holds an item at
//! any instant — items are never duplicated and never orphaned.

use crate::sync::{AtomicFlag, FlagValue};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

/// Lifecycle phase of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkPhase {
    /// Queued, not yet started.
    Waiting,
    /// Executing on a worker.
    Running,
    /// Finished, successfully or not.
    Completed,
}

impl FlagValue for WorkPhase {
    fn into_raw(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Running => 1,
            Self::Completed => 2,
        }
    }

    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Waiting),
            1 => Some(Self::Running),
            2 => Some(Self::Completed),
            _ => None,
        }
    }
}

/// One unit of submitted work.
pub struct WorkItem {
    action: Option<Box<dyn FnOnce() + Send + 'static>>,
    priority: u8,
    seq: u64,
    phase: AtomicFlag<WorkPhase>,
    panic_message: OnceLock<String>,
}

impl WorkItem {
    /// Wraps `action` with its scheduling metadata.
    #[must_use]
    pub fn new(action: impl FnOnce() + Send + 'static, priority: u8, seq: u64) -> Self {
        Self {
            action: Some(Box::new(action)),
            priority,
            seq,
            phase: AtomicFlag::new(WorkPhase::Waiting),
            panic_message: OnceLock::new(),
        }
    }

    /// Scheduling priority; higher is more urgent.
    #[inline]
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Pool-wide monotonic submission sequence number.
    #[inline]
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Option<WorkPhase> {
        self.phase.get()
    }

    /// Message captured from a panicking action, if any.
    #[must_use]
    pub fn panic_message(&self) -> Option<&str> {
        self.panic_message.get().map(String::as_str)
    }

    /// Runs the action exactly once, containing any panic.
    ///
    /// Returns `false` if the action panicked; the message is recorded on
    /// the item's completion state. The unwind never escapes to the
    /// calling worker. Running an already-run item is a no-op reporting
    /// success.
    pub fn run(&mut self) -> bool {
        let Some(action) = self.action.take() else {
            return true;
        };
        let _ = self.phase.try_set(WorkPhase::Running, Some(WorkPhase::Waiting));
        let result = panic::catch_unwind(AssertUnwindSafe(action));
        let _ = self.phase.try_set(WorkPhase::Completed, Some(WorkPhase::Running));
        match result {
            Ok(()) => true,
            Err(payload) => {
                let _ = self.panic_message.set(panic_text(payload.as_ref()));
                false
            }
        }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "work item panicked".to_owned()
    }
}
