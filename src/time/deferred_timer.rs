//! Pausable, resumable, cancelable one-shot delayed callback.
//!
//! [`DeferredTimer`] arms a callback to run once after a delay. The
//! countdown can be paused and later resumed for the *residual* delay, so
//! the time spent paused never counts toward the delay itself. Every arm
//! and resume stamps a fresh version through an internal
//! [`VersionGuard`]; the fire path re-checks its stamp before invoking the
//! callback, which makes a fire racing a concurrent pause, cancel, or
//! re-arm a harmless no-op.
//!
//! The timing facility is one dedicated thread blocking on a condvar with
//! a deadline timeout — there is no polling loop.

use crate::sync::VersionGuard;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::trace;

/// Externally observable timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    /// Constructed, never armed.
    Idle,
    /// Counting down toward a deadline.
    Armed,
    /// Countdown frozen; the residual delay is remembered.
    Paused,
    /// The callback ran.
    Fired,
    /// The pending fire was invalidated.
    Canceled,
    /// The timing thread has been released.
    Disposed,
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Idle,
    Armed { deadline: Instant, version: i64 },
    Paused { remaining: Duration },
    Fired,
    Canceled,
    Disposed,
}

impl Control {
    fn phase(self) -> TimerPhase {
        match self {
            Self::Idle => TimerPhase::Idle,
            Self::Armed { .. } => TimerPhase::Armed,
            Self::Paused { .. } => TimerPhase::Paused,
            Self::Fired => TimerPhase::Fired,
            Self::Canceled => TimerPhase::Canceled,
            Self::Disposed => TimerPhase::Disposed,
        }
    }
}

struct TimerShared {
    control: Mutex<Control>,
    cond: Condvar,
    guard: VersionGuard,
}

/// A one-shot delayed callback with pause/resume/cancel.
///
/// The callback is bound at construction; [`DeferredTimer::set`] arms it.
/// Re-arming after a fire is allowed — each arm is its own one-shot.
pub struct DeferredTimer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl DeferredTimer {
    /// Creates a timer bound to `callback` and starts its timing thread.
    #[must_use]
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        let shared = Arc::new(TimerShared {
            control: Mutex::new(Control::Idle),
            cond: Condvar::new(),
            guard: VersionGuard::new(callback),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = thread::spawn(move || run_timing_loop(&thread_shared));
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Arms a one-shot fire `delay` from now, stamping a fresh version.
    ///
    /// Re-arming while armed reschedules: the previous pending fire is
    /// invalidated by the version bump. No effect once disposed.
    pub fn set(&self, delay: Duration) {
        let mut control = self.shared.control.lock();
        if matches!(*control, Control::Disposed) {
            return;
        }
        let version = self.shared.guard.update_version();
        *control = Control::Armed {
            deadline: Instant::now() + delay,
            version,
        };
        trace!(delay_ms = delay.as_millis() as u64, "deferred timer armed");
        self.shared.cond.notify_all();
    }

    /// Freezes the countdown, remembering the residual delay.
    ///
    /// No effect unless currently armed.
    pub fn pause(&self) {
        let mut control = self.shared.control.lock();
        if let Control::Armed { deadline, .. } = *control {
            // Invalidate the pending fire before the state change so a
            // fire already past its deadline check cannot slip through.
            self.shared.guard.update_version();
            let remaining = deadline.saturating_duration_since(Instant::now());
            *control = Control::Paused { remaining };
            trace!(remaining_ms = remaining.as_millis() as u64, "deferred timer paused");
            self.shared.cond.notify_all();
        }
    }

    /// Resumes the countdown for the residual delay under a fresh version.
    ///
    /// Total time from [`DeferredTimer::set`] to fire equals the elapsed
    /// time before the pause plus the residual after it, independent of
    /// how long the pause lasted. No effect unless currently paused.
    pub fn resume(&self) {
        let mut control = self.shared.control.lock();
        if let Control::Paused { remaining } = *control {
            let version = self.shared.guard.update_version();
            *control = Control::Armed {
                deadline: Instant::now() + remaining,
                version,
            };
            trace!(remaining_ms = remaining.as_millis() as u64, "deferred timer resumed");
            self.shared.cond.notify_all();
        }
    }

    /// Invalidates the pending fire, if any.
    ///
    /// Idempotent; safe after a natural fire (a fired timer stays fired).
    pub fn cancel(&self) {
        let mut control = self.shared.control.lock();
        if matches!(*control, Control::Armed { .. } | Control::Paused { .. }) {
            self.shared.guard.update_version();
            *control = Control::Canceled;
            trace!("deferred timer canceled");
            self.shared.cond.notify_all();
        }
    }

    /// Stops and joins the timing thread.
    ///
    /// Idempotent; safe after [`DeferredTimer::cancel`] or a natural fire.
    /// Must not be called from inside the timer's own callback.
    pub fn dispose(&mut self) {
        {
            let mut control = self.shared.control.lock();
            if !matches!(*control, Control::Disposed) {
                self.shared.guard.update_version();
                *control = Control::Disposed;
                self.shared.cond.notify_all();
            }
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Returns the externally observable state.
    #[must_use]
    pub fn phase(&self) -> TimerPhase {
        self.shared.control.lock().phase()
    }
}

impl Drop for DeferredTimer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DeferredTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTimer")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

fn run_timing_loop(shared: &TimerShared) {
    let mut control = shared.control.lock();
    loop {
        match *control {
            Control::Disposed => return,
            Control::Armed { deadline, version } => {
                let now = Instant::now();
                if now >= deadline {
                    // Commit before invoking: a cancel/pause arriving from
                    // here on sees a fired timer and no-ops, while a
                    // concurrent re-arm still suppresses this stamp.
                    *control = Control::Fired;
                    drop(control);
                    if !shared.guard.execute(version) {
                        trace!("deferred fire suppressed by newer version");
                    }
                    control = shared.control.lock();
                } else {
                    let timeout = deadline - now;
                    let _ = shared.cond.wait_for(&mut control, timeout);
                }
            }
            _ => shared.cond.wait(&mut control),
        }
    }
}
