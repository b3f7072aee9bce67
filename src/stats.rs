//! Per-engine operation counters.

use core::sync::atomic::{AtomicU64, Ordering};

/// Statistics for one hotplug engine.
#[derive(Debug, Default)]
pub struct HotplugStats {
    /// Completed scans, including gated ones.
    pub scan_count: AtomicU64,
    /// Scans that walked every item to recover lost events.
    pub forced_count: AtomicU64,
    /// Successful attaches.
    pub attach_count: AtomicU64,
    /// Attaches that failed on adapter or instantiation.
    pub attach_error_count: AtomicU64,
    /// Detaches.
    pub detach_count: AtomicU64,
    /// Register read/write failures.
    pub io_error_count: AtomicU64,
    /// Events handed to the notification channel.
    pub event_count: AtomicU64,
}

impl HotplugStats {
    /// Creates a new statistics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_scan(&self) {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_forced(&self) {
        self.forced_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_attach(&self) {
        self.attach_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_attach_error(&self) {
        self.attach_error_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_detach(&self) {
        self.detach_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_io_error(&self) {
        self.io_error_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_event(&self) {
        self.event_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the number of completed scans.
    #[inline]
    pub fn scans(&self) -> u64 {
        self.scan_count.load(Ordering::Relaxed)
    }

    /// Gets the number of forced full rescans.
    #[inline]
    pub fn forced_rescans(&self) -> u64 {
        self.forced_count.load(Ordering::Relaxed)
    }

    /// Gets the number of successful attaches.
    #[inline]
    pub fn attaches(&self) -> u64 {
        self.attach_count.load(Ordering::Relaxed)
    }

    /// Gets the number of failed attaches.
    #[inline]
    pub fn attach_errors(&self) -> u64 {
        self.attach_error_count.load(Ordering::Relaxed)
    }

    /// Gets the number of detaches.
    #[inline]
    pub fn detaches(&self) -> u64 {
        self.detach_count.load(Ordering::Relaxed)
    }

    /// Gets the number of register transport errors.
    #[inline]
    pub fn io_errors(&self) -> u64 {
        self.io_error_count.load(Ordering::Relaxed)
    }

    /// Gets the number of events delivered to the notification channel.
    #[inline]
    pub fn events(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }
}
