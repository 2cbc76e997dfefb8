//! Synchronization primitives.

pub mod atomic_flag;
pub mod concurrent_set;
pub mod version_guard;

pub use atomic_flag::{AtomicFlag, FlagValue};
pub use concurrent_set::ConcurrentSet;
pub use version_guard::VersionGuard;
