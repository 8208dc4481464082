//! In-flight accounting for graceful shutdown.
//!
//! [`DrainTracker`] counts pending work and lets the shutdown path wait until
//! that count reaches zero. Work is registered with [`DrainTracker::enter`],
//! which hands back an [`InFlightGuard`]; dropping the guard releases the
//! slot. Tying the decrement to `Drop` means every exit path of an execution,
//! including panics, releases exactly once.

use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct DrainTracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl DrainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one unit of pending work.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Number of units currently registered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Resolves once no work is registered. Returns immediately when the
    /// count is already zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register interest before re-reading the counter so a release
            // between the load and the await is not missed.
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Releases its slot in the [`DrainTracker`] when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the in-flight slot"]
pub struct InFlightGuard {
    tracker: Arc<DrainTracker>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.leave();
    }
}
