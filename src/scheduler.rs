//! Coalescing scan scheduler.
//!
//! The scheduler holds at most one pending scan request, expressed as an
//! absolute deadline in nanoseconds. Every new request cancels the pending
//! one and replaces it (last request wins), so any number of triggers that
//! arrive before the worker wakes collapse into one scan.
//!
//! The worker side is driven by the host: it calls
//! [`take_due`](ScanScheduler::take_due) with the current time and runs a
//! scan when it returns `true`, the same way a vCPU loop drains pending
//! interrupts before entry.
//!
//! The spin lock only covers the cancel-and-reschedule sequence and is never
//! held across register I/O, so [`trigger`](ScanScheduler::trigger) is safe to
//! call from interrupt context.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

/// Single-slot deadline scheduler with coalescing semantics.
pub struct ScanScheduler {
    /// Deadline of the pending scan, `None` if nothing is pending.
    deadline: Mutex<Option<u64>>,
    /// Requests that replaced an already pending one.
    coalesced: AtomicU64,
}

impl ScanScheduler {
    /// Creates a scheduler with nothing pending.
    pub const fn new() -> Self {
        Self {
            deadline: Mutex::new(None),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Requests a scan as soon as the worker runs.
    #[inline]
    pub fn trigger(&self) {
        self.reschedule(0);
    }

    /// Cancels the pending request (if any) and installs `deadline`.
    pub fn reschedule(&self, deadline: u64) {
        let mut slot = self.deadline.lock();
        if slot.replace(deadline).is_some() {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Installs `deadline` unless an earlier request is already pending.
    ///
    /// Used for the engine's own re-queues, which must never push back a
    /// trigger that arrived while the scan was running.
    pub fn arm_by(&self, deadline: u64) {
        let mut slot = self.deadline.lock();
        match *slot {
            Some(pending) if pending <= deadline => {}
            _ => *slot = Some(deadline),
        }
    }

    /// Cancels the pending request. Returns `true` if one was pending.
    pub fn cancel(&self) -> bool {
        self.deadline.lock().take().is_some()
    }

    /// Consumes the pending request if its deadline has passed.
    pub fn take_due(&self, now: u64) -> bool {
        let mut slot = self.deadline.lock();
        match *slot {
            Some(deadline) if deadline <= now => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Returns the deadline of the pending request.
    pub fn next_deadline(&self) -> Option<u64> {
        *self.deadline.lock()
    }

    /// Number of requests that were folded into an already pending one.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl Default for ScanScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ScanScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScanScheduler")
            .field("deadline", &self.next_deadline())
            .field("coalesced", &self.coalesced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_due_immediately() {
        let scheduler = ScanScheduler::new();
        assert!(!scheduler.take_due(0));

        scheduler.trigger();
        assert_eq!(scheduler.next_deadline(), Some(0));
        assert!(scheduler.take_due(0));

        // Consumed
        assert_eq!(scheduler.next_deadline(), None);
        assert!(!scheduler.take_due(100));
    }

    #[test]
    fn test_triggers_coalesce() {
        let scheduler = ScanScheduler::new();
        scheduler.trigger();
        scheduler.trigger();
        scheduler.trigger();

        assert_eq!(scheduler.coalesced(), 2);
        assert!(scheduler.take_due(0));
        assert!(!scheduler.take_due(0));
    }

    #[test]
    fn test_delayed_schedule() {
        let scheduler = ScanScheduler::new();
        scheduler.reschedule(1_500);
        assert_eq!(scheduler.next_deadline(), Some(1_500));

        assert!(!scheduler.take_due(1_499));
        assert!(scheduler.take_due(1_500));
    }

    #[test]
    fn test_trigger_replaces_delayed_run() {
        let scheduler = ScanScheduler::new();
        scheduler.reschedule(1_001_000);

        // Interrupt arrives: the delayed run is cancelled and replaced
        scheduler.trigger();
        assert_eq!(scheduler.next_deadline(), Some(0));
        assert!(scheduler.take_due(1_000));
    }

    #[test]
    fn test_arm_by_keeps_earlier_request() {
        let scheduler = ScanScheduler::new();
        scheduler.trigger();
        scheduler.arm_by(5_000);
        assert_eq!(scheduler.next_deadline(), Some(0));

        scheduler.cancel();
        scheduler.arm_by(5_000);
        scheduler.arm_by(2_000);
        assert_eq!(scheduler.next_deadline(), Some(2_000));
        assert_eq!(scheduler.coalesced(), 0);
    }

    #[test]
    fn test_cancel() {
        let scheduler = ScanScheduler::new();
        assert!(!scheduler.cancel());
        scheduler.trigger();
        assert!(scheduler.cancel());
        assert!(!scheduler.take_due(u64::MAX));
    }
}
