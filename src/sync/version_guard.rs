//! Version-guarded callback execution.
//!
//! [`VersionGuard`] pairs a monotonically increasing version counter with a
//! bound action. Schedulers stamp a callback with the version current at
//! arm time; when the callback eventually runs it passes its stamp through
//! [`VersionGuard::execute`], which fires the action only if no newer
//! version has been issued since. A reschedule bumps the version before
//! re-arming, so a callback already queued to run with the old stamp
//! becomes a harmless no-op — stale firing is expected, never an error.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// A monotonic version counter with a bound action.
pub struct VersionGuard {
    version: AtomicI64,
    last_fired: AtomicI64,
    action: Box<dyn Fn() + Send + Sync>,
}

impl VersionGuard {
    /// Version reserved for "unset/never armed".
    ///
    /// [`VersionGuard::update_version`] never produces this value: the
    /// increment wraps `i64::MAX` to `i64::MIN + 1`, skipping the sentinel.
    pub const UNSET_VERSION: i64 = i64::MIN;

    /// Creates a guard bound to `action`, with the version unset.
    #[must_use]
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            version: AtomicI64::new(Self::UNSET_VERSION),
            last_fired: AtomicI64::new(Self::UNSET_VERSION),
            action: Box::new(action),
        }
    }

    /// Returns the current version.
    #[inline]
    #[must_use]
    pub fn current_version(&self) -> i64 {
        self.version.load(Ordering::Acquire)
    }

    /// Atomically advances the version and returns the new value.
    ///
    /// Wraparound preserves the sentinel: incrementing `i64::MAX` yields
    /// `i64::MIN + 1`, never `i64::MIN`.
    pub fn update_version(&self) -> i64 {
        let mut current = self.version.load(Ordering::Acquire);
        loop {
            let next = if current == i64::MAX {
                i64::MIN + 1
            } else {
                current + 1
            };
            match self.version.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Invokes the bound action iff `stamped_version` is still current.
    ///
    /// A stale or sentinel stamp is a silent no-op, not an error. Each
    /// version fires at most once, even if two carriers of the same stamp
    /// race into this call. Returns whether the action ran.
    pub fn execute(&self, stamped_version: i64) -> bool {
        if stamped_version == Self::UNSET_VERSION {
            return false;
        }
        if self.version.load(Ordering::Acquire) != stamped_version {
            return false;
        }
        // Claim the version before invoking so a racing duplicate no-ops.
        let claimed = self
            .last_fired
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (last != stamped_version).then_some(stamped_version)
            })
            .is_ok();
        if !claimed {
            return false;
        }
        (self.action)();
        true
    }

    /// Overwrites the current version, bypassing the increment rule.
    #[cfg(test)]
    pub(crate) fn force_version(&self, version: i64) {
        self.version.store(version, Ordering::SeqCst);
    }
}

impl fmt::Debug for VersionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionGuard")
            .field("version", &self.current_version())
            .finish_non_exhaustive()
    }
}
