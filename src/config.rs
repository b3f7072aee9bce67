/// Number of consecutive scans without assertion after which the next scan
/// walks every item.
pub const DEFAULT_NOT_ASSERTED_LIMIT: u8 = 3;

/// Runtime tunables of one hotplug engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotplugConfig {
    /// Delay between periodic scans of topologies without an aggregation
    /// cell, in nanoseconds.
    pub poll_interval_ns: u64,
    /// Delay of the validation pass re-queued after a productive scan, in
    /// nanoseconds.
    pub rescan_delay_ns: u64,
    /// Consecutive no-op scans before a forced full rescan.
    pub not_asserted_limit: u8,
}

impl HotplugConfig {
    /// The default configuration: immediate re-queue and a limit of 3.
    pub const fn new() -> Self {
        Self {
            poll_interval_ns: 0,
            rescan_delay_ns: 0,
            not_asserted_limit: DEFAULT_NOT_ASSERTED_LIMIT,
        }
    }

    /// Sets the periodic poll interval.
    pub const fn with_poll_interval(mut self, ns: u64) -> Self {
        self.poll_interval_ns = ns;
        self
    }

    /// Sets the validation pass delay.
    pub const fn with_rescan_delay(mut self, ns: u64) -> Self {
        self.rescan_delay_ns = ns;
        self
    }

    /// Sets the forced rescan threshold. Zero is clamped to one.
    pub const fn with_not_asserted_limit(mut self, limit: u8) -> Self {
        self.not_asserted_limit = if limit == 0 { 1 } else { limit };
        self
    }
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self::new()
    }
}
