//! The read-only predicate the serving path consults before emitting any
//! Master-authoritative response.

use crate::clock::Clock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A wait-free, shareable view over the controller's lease deadline.
///
/// `endLeaseMs == 0` means not-Master; the controller zeroes it before
/// logging a demotion and raises it only after a successful CAS on LEASE, so
/// this view is always consistent with the invariants in the data model.
#[derive(Clone, Debug)]
pub struct LeaseView {
    end_lease_millis: Arc<AtomicI64>,
    clock: Arc<dyn Clock>,
}

impl LeaseView {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            end_lease_millis: Arc::new(AtomicI64::new(0)),
            clock,
        }
    }

    pub(crate) fn handle(&self) -> EndLeaseHandle {
        EndLeaseHandle(self.end_lease_millis.clone())
    }

    /// Returns true iff the replica is currently authorised to act as
    /// Master.
    ///
    /// Lock-free; safe to call concurrently from any number of serving
    /// threads or tasks.
    pub fn in_lease_period(&self) -> bool {
        self.clock.now_millis() <= self.end_lease_millis.load(Ordering::Acquire)
    }

    /// Returns the raw `endLeaseMs` value, for diagnostics/logging only.
    pub fn end_lease_millis(&self) -> i64 {
        self.end_lease_millis.load(Ordering::Acquire)
    }
}

/// The write side of [`LeaseView`]'s shared atomic, held only by the
/// controller's scheduler task.
#[derive(Clone, Debug)]
pub(crate) struct EndLeaseHandle(Arc<AtomicI64>);

impl EndLeaseHandle {
    pub(crate) fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    pub(crate) fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn reflects_writer_updates() {
        let clock = FakeClock::new(1_000);
        let view = LeaseView::new(Arc::new(clock.clone()));
        let writer = view.handle();

        assert!(!view.in_lease_period());

        writer.set(2_000);
        assert!(view.in_lease_period());

        clock.set(2_001);
        assert!(!view.in_lease_period());

        writer.set(0);
        assert!(!view.in_lease_period());
    }
}
