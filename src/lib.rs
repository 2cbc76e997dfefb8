//! In-process, multi-threaded work-execution engine.
//!
//! `stealpool` is a configurable thread pool that accepts short-lived work
//! items, distributes them across a fixed set of worker threads using
//! pluggable queuing disciplines, and rebalances load through work-stealing.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - [`sync::AtomicFlag`] — atomic compare-and-swap cell over a small
//!   enumerated value; the foundation for worker state transitions.
//! - [`sync::VersionGuard`] — monotonic version counter that suppresses
//!   stale scheduled callbacks.
//! - [`time::DeferredTimer`] — pausable/resumable/cancelable one-shot
//!   delayed callback, built on [`sync::VersionGuard`] for race-free fire
//!   suppression.
//! - [`queue::StealableQueue`] — per-worker concurrent priority container
//!   supporting local push/pop plus cross-worker steal, with an
//!   ownership-enforcement toggle fixed at construction.
//! - [`pool::PoolScheduler`] — owns the workers, each with one queue and one
//!   state flag; implements submission, placement, stealing, backpressure,
//!   and drain-wait.
//!
//! # Example
//!
//! ```no_run
//! use stealpool::{PoolConfig, PoolScheduler};
//!
//! let pool = PoolScheduler::new(PoolConfig::default()).expect("valid config");
//! pool.queue_work_item(|| println!("hello from a worker"));
//! pool.wait();
//! ```
//!
//! # Concurrency model
//!
//! Real parallel worker threads, one per configured pool slot. A worker
//! blocks only when its own queue and every stealable sibling queue are
//! empty. A single worker's local pop sequence reproduces the documented
//! (priority descending, sequence ascending) order for items it pushed
//! itself; cross-worker execution order is best-effort, traded for
//! throughput. Work-item execution has no forced interruption — a running
//! action runs to completion, and a panic inside it is contained to its
//! worker and recorded on the item's completion state.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod pool;
pub mod queue;
pub mod sync;
pub mod time;
pub mod util;

pub use config::{ConfigError, PoolConfig, QueueDiscipline, RejectKind, RejectPolicy};
pub use error::PoolError;
pub use pool::{PoolScheduler, WorkItem, WorkPhase, WorkerId, WorkerState};
pub use queue::{StealableQueue, Stealer};
pub use sync::{AtomicFlag, ConcurrentSet, FlagValue, VersionGuard};
pub use time::{DeferredTimer, TimerPhase};
