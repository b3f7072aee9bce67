//! Engine lifecycle with an atomic state machine.
//!
//! The lifecycle is what guarantees that at most one scan runs at a time and
//! that teardown never overlaps a scan. Every transition is a single CAS on
//! one atomic, so an interrupt-side trigger can look at the state without
//! taking any lock.
//!
//! ```text
//!              try_begin_enable()        end_scan()
//! ┌──────────┐ ────────────────> ┌──────────┐ ─────> ┌──────┐
//! │ Disabled │                   │ Scanning │        │ Idle │
//! └──────────┘ <──────────────── └──────────┘ <───── └──────┘
//!      ^         abort_enable()             try_begin_scan()  │
//!      │                                                      │ begin_disable()
//!      │            complete_disable()   ┌───────────┐        │ (waits for Scanning
//!      └──────────────────────────────── │ Disabling │ <──────┘  to finish)
//!                                        └───────────┘
//! ```

use core::sync::atomic::{AtomicU8, Ordering};

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Events masked, nothing attached.
    Disabled = 0,
    /// Enabled and waiting for a trigger.
    Idle = 1,
    /// Setup or a scan is in progress.
    Scanning = 2,
    /// Teardown is in progress.
    Disabling = 3,
}

impl EngineState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Disabled,
            1 => Self::Idle,
            2 => Self::Scanning,
            _ => Self::Disabling,
        }
    }
}

/// Tracks the lifecycle state of one hotplug engine.
pub struct EngineLifecycle {
    state: AtomicU8,
}

impl EngineLifecycle {
    /// Creates a lifecycle in the Disabled state.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Disabled as u8),
        }
    }

    /// Gets the current state.
    #[inline]
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while the engine accepts triggers.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        matches!(self.state(), EngineState::Idle | EngineState::Scanning)
    }

    #[inline]
    fn transition(&self, from: EngineState, to: EngineState) -> Result<(), EngineState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(EngineState::from_u8)
    }

    /// Disabled -> Scanning, for setup and the initial scan.
    ///
    /// Returns the current state if the engine is not Disabled.
    pub fn try_begin_enable(&self) -> Result<(), EngineState> {
        self.transition(EngineState::Disabled, EngineState::Scanning)
    }

    /// Scanning -> Disabled, when setup failed.
    pub fn abort_enable(&self) {
        self.state.store(EngineState::Disabled as u8, Ordering::Release);
    }

    /// Idle -> Scanning. Fails if a scan is already running or the engine
    /// is not enabled.
    #[inline]
    pub fn try_begin_scan(&self) -> bool {
        self.transition(EngineState::Idle, EngineState::Scanning).is_ok()
    }

    /// Scanning -> Idle.
    #[inline]
    pub fn end_scan(&self) {
        self.state.store(EngineState::Idle as u8, Ordering::Release);
    }

    /// Idle -> Disabling, waiting for an in-flight scan to finish first.
    ///
    /// Returns `false` if the engine is already Disabled or Disabling.
    pub fn begin_disable(&self) -> bool {
        loop {
            match self.state() {
                EngineState::Idle => {
                    if self.transition(EngineState::Idle, EngineState::Disabling).is_ok() {
                        return true;
                    }
                }
                // A scan is bounded by register I/O latency
                EngineState::Scanning => core::hint::spin_loop(),
                EngineState::Disabled | EngineState::Disabling => return false,
            }
        }
    }

    /// Disabling -> Disabled.
    pub fn complete_disable(&self) {
        self.state.store(EngineState::Disabled as u8, Ordering::Release);
    }
}

impl Default for EngineLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("state", &self.state())
            .finish()
    }
}
