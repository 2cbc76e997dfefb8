//! Pool construction configuration.
//!
//! This module provides:
//! - The top-level [`PoolConfig`] with sensible defaults
//! - The queuing-discipline and reject-policy knobs
//! - Validation for guardrail invariants, applied before any worker
//!   thread starts

use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;

/// Queuing discipline applied to every worker's queue.
///
/// All disciplines share one ordering contract — priority descending,
/// submission sequence ascending — and differ only in which end of that
/// order is used for local versus steal access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueDiscipline {
    /// Owner pushes/pops at the head; stealers take the tail.
    #[default]
    Fifo,
    /// Same ends as [`QueueDiscipline::Fifo`]; kept as a distinct
    /// discipline for configuration compatibility.
    Stack,
    /// Owner may pop either end; stealers take the end opposite the
    /// owner's most recent local operation.
    Deque,
}

/// What to do with a submission when the target worker's queue is at its
/// length limit.
///
/// Discards are a documented backpressure contract, not an error: the
/// discarded item's action is never invoked and nothing is surfaced to the
/// submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum RejectKind {
    /// Silently discard the least-urgent *queued* item (the tail of the
    /// priority order) to admit the new one. The aggregate waiting count
    /// is unchanged.
    #[default]
    DiscardQueued,
    /// Silently discard the *incoming* item; the queue is untouched.
    DiscardIncoming,
}

/// Backpressure policy applied per-worker-queue, not pool-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectPolicy {
    /// Which side of the limit collision gets discarded.
    pub kind: RejectKind,
    /// Maximum number of waiting items per worker queue.
    pub thread_queue_limit: usize,
}

impl Default for RejectPolicy {
    fn default() -> Self {
        Self {
            kind: RejectKind::DiscardQueued,
            thread_queue_limit: 1024,
        }
    }
}

/// Top-level configuration for a [`crate::PoolScheduler`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub max_threads: usize,
    /// Discipline applied to every worker's queue.
    pub queue_type: QueueDiscipline,
    /// Disables stealing pool-wide.
    ///
    /// Deprecated alias kept for compatibility: it maps onto the same
    /// per-queue owner-only flag that each queue holds fixed from
    /// construction.
    pub enforce_queue_ownership: bool,
    /// Admission control applied against the target worker's queue length.
    pub reject_policy: RejectPolicy,
    /// Grace period for [`crate::PoolScheduler::shutdown`]: workers that
    /// have not drained within this window are forced to stop after their
    /// in-flight item.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            queue_type: QueueDiscipline::default(),
            enforce_queue_ownership: false,
            reject_policy: RejectPolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Validates the configuration for basic sanity.
    ///
    /// Invalid configuration must fail immediately and loudly, before any
    /// worker thread starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.reject_policy.thread_queue_limit == 0 {
            return Err(ConfigError::ZeroQueueLimit);
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroShutdownTimeout);
        }
        Ok(())
    }
}

/// Errors raised by [`PoolConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The pool must have at least one worker.
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// A queue limit of zero would reject every submission.
    #[error("per-worker queue limit must be at least 1")]
    ZeroQueueLimit,

    /// A zero grace period would force-stop workers before they can drain.
    #[error("shutdown timeout must be non-zero")]
    ZeroShutdownTimeout,
}
