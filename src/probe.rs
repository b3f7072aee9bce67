//! Slot presence and wakeup-signal probes.
//!
//! Topologies without an aggregation cell (e.g. fabric or line-card FRUs on a
//! modular chassis) cannot tell from their own registers whether anything
//! changed. They are instead gated by a chassis-level probe addressed by the
//! slot number the unit was enabled with.

use alloc::sync::Arc;

/// Reports whether the unit in a slot is physically present.
pub trait PresenceProbe: Send + Sync {
    /// Returns `true` if the unit in `slot` is present.
    fn present(&self, slot: u32) -> bool;
}

/// Reports and clears a per-slot wakeup signal.
///
/// A wakeup probe is also a presence probe; chassis that latch a wakeup
/// signal always expose presence alongside it.
pub trait WakeupProbe: PresenceProbe {
    /// Returns `true` if the slot has signalled a change.
    fn signalled(&self, slot: u32) -> bool;

    /// Clears the slot's latched wakeup signal.
    fn clear(&self, slot: u32);
}

/// Closed set of probe capabilities a topology can be gated by.
#[derive(Clone, Default)]
pub enum SlotProbe {
    /// No probe; scans are never gated.
    #[default]
    None,
    /// Skip scans while the slot is empty.
    Presence(Arc<dyn PresenceProbe>),
    /// Skip scans while the slot is empty or has not signalled a change.
    WakeupSignal(Arc<dyn WakeupProbe>),
}

impl SlotProbe {
    /// Returns `false` only if a probe positively reports the slot empty.
    pub fn present(&self, slot: u32) -> bool {
        match self {
            Self::None => true,
            Self::Presence(probe) => probe.present(slot),
            Self::WakeupSignal(probe) => probe.present(slot),
        }
    }

    /// Returns the wakeup signal state, or `None` without a wakeup probe.
    pub fn signalled(&self, slot: u32) -> Option<bool> {
        match self {
            Self::WakeupSignal(probe) => Some(probe.signalled(slot)),
            _ => None,
        }
    }

    /// Clears the wakeup signal, if the probe latches one.
    pub fn clear(&self, slot: u32) {
        if let Self::WakeupSignal(probe) = self {
            probe.clear(slot);
        }
    }

    /// Returns `true` if this probe latches a wakeup signal.
    pub fn has_wakeup(&self) -> bool {
        matches!(self, Self::WakeupSignal(_))
    }
}

impl core::fmt::Debug for SlotProbe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Presence(_) => f.write_str("Presence"),
            Self::WakeupSignal(_) => f.write_str("WakeupSignal"),
        }
    }
}
