//! Time-based primitives.

pub mod deferred_timer;

pub use deferred_timer::{DeferredTimer, TimerPhase};
