//! Crate-level error types.
//!
//! Construction is the only fallible surface: invalid configuration and
//! thread-spawn failures are reported before any work is accepted. Runtime
//! paths signal through return values instead — empty queues return `None`,
//! compare-and-swap failures return `false`, stale version stamps are
//! silent no-ops, and policy discards surface nothing at all.

use crate::config::ConfigError;
use std::io;
use thiserror::Error;

/// Errors that can occur while constructing a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configuration failed validation.
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// The underlying spawn error.
        #[source]
        source: io::Error,
    },
}
