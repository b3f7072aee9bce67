//! Per-item register scan and edge detection.
//!
//! Each item keeps a cache of its last masked status. A scan masks the
//! item's event source, reads the status, and XORs it against the cache to
//! find the bits that changed; after the caller has acted on them the event
//! is acknowledged and the source unmasked again with the item's active mask.
//!
//! The active mask starts as the topology mask and is narrowed once at setup
//! from the capability registers. Bits outside it are dropped right after the
//! read, so they can never show up as asserted.

use alloc::vec::Vec;

use arrayvec::ArrayVec;
use axerrno::AxResult;

use crate::attach::Attachment;
use crate::health::HealthState;
use crate::regmap::{low_bits, RegisterMap, EVENT_OFF, MASK_OFF};
use crate::topology::{BitEntry, Item};

/// Runtime state of one unit.
#[derive(Debug, Default)]
pub struct EntryState {
    /// Present while the unit is attached.
    pub attachment: Option<Attachment>,
    /// Healthy health scans since the last attach; reset on detach.
    pub health_cntr: u32,
}

impl EntryState {
    #[inline]
    pub fn attached(&self) -> bool {
        self.attachment.is_some()
    }
}

/// Runtime state of one item.
#[derive(Debug)]
pub struct ItemState {
    /// Masked status as of the last successful latch.
    pub cache: u8,
    /// Topology mask narrowed by capability registers.
    pub active_mask: u8,
    /// One state per topology entry, same order.
    pub entries: Vec<EntryState>,
}

impl ItemState {
    pub fn new(item: &Item) -> Self {
        Self {
            cache: 0,
            active_mask: item.mask,
            entries: item.entries.iter().map(|_| EntryState::default()).collect(),
        }
    }
}

/// Result of latching one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Masked status value just read.
    pub value: u8,
    /// Bits that differ from the previous value.
    pub asserted: u8,
}

impl Edge {
    /// Returns `true` if any bit changed.
    #[inline]
    pub fn changed(&self) -> bool {
        self.asserted != 0
    }

    /// Positions of the changed bits, lowest first.
    pub fn asserted_bits(&self) -> ArrayVec<u8, 8> {
        (0..8u8).filter(|bit| self.asserted & (1 << bit) != 0).collect()
    }
}

/// Bits of the status register owned by `entry`.
#[inline]
pub fn entry_mask(item: &Item, entry: &BitEntry) -> u8 {
    if item.health {
        HealthState::FIELD_MASK << entry.bit
    } else {
        1 << entry.bit
    }
}

/// Narrows the active mask, clears stale events and primes the cache.
///
/// Inversed items start with a cache equal to the mask (everything absent)
/// and are unmasked right away; other items start from zero and are
/// unmasked by the first scan.
pub fn setup(regmap: &dyn RegisterMap, item: &Item, state: &mut ItemState) -> AxResult {
    let mut mask = item.mask;

    if let Some(cap) = item.capability {
        let count = regmap.read(cap)? & item.mask;
        mask = low_bits(count);
        debug!("item {:#04x}: capability {:#04x} reports {} units", item.reg, cap, count);
    }

    regmap.write(item.reg + EVENT_OFF, 0)?;

    for entry in &item.entries {
        if let Some(cap) = entry.capability {
            if regmap.read(cap.reg)? & cap.mask == 0 {
                debug!("{}: not populated, masking bit {}", entry.label, entry.bit);
                mask &= !entry_mask(item, entry);
            }
        }
    }

    state.active_mask = mask;
    state.cache = 0;

    if item.inversed {
        state.cache = mask;
        regmap.write(item.reg + MASK_OFF, mask)?;
    }

    Ok(())
}

/// Masks the event source, reads the status and updates the cache.
pub fn latch(regmap: &dyn RegisterMap, item: &Item, state: &mut ItemState) -> AxResult<Edge> {
    regmap.write(item.reg + MASK_OFF, 0)?;

    let value = regmap.read(item.reg)? & state.active_mask;
    let asserted = state.cache ^ value;
    state.cache = value;

    trace!("item {:#04x}: value {:#04x} asserted {:#04x}", item.reg, value, asserted);
    Ok(Edge { value, asserted })
}

/// Acknowledges the latched event and unmasks the event source.
pub fn rearm(regmap: &dyn RegisterMap, item: &Item, state: &ItemState) -> AxResult {
    regmap.write(item.reg + EVENT_OFF, 0)?;
    regmap.write(item.reg + MASK_OFF, state.active_mask)
}

/// Masks the event source and clears any latched event.
pub fn quiesce(regmap: &dyn RegisterMap, item: &Item) -> AxResult {
    regmap.write(item.reg + MASK_OFF, 0)?;
    regmap.write(item.reg + EVENT_OFF, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRegisters;
    use crate::topology::BitEntry;
    use axerrno::AxError;

    fn fan_item() -> Item {
        Item::new(0x88, 0x3f)
            .inversed()
            .with_capability(0x10)
            .entry(BitEntry::new("fan1", 0))
            .entry(BitEntry::new("fan2", 1))
            .entry(BitEntry::new("fan3", 2))
            .entry(BitEntry::new("fan4", 3))
            .entry(BitEntry::new("fan5", 4))
            .entry(BitEntry::new("fan6", 5))
    }

    #[test]
    fn test_asserted_bits() {
        let edge = Edge { value: 0, asserted: 0b1000_0101 };
        assert_eq!(edge.asserted_bits().as_slice(), &[0, 2, 7]);
        assert!(edge.changed());
        assert!(Edge { value: 3, asserted: 0 }.asserted_bits().is_empty());
    }

    #[test]
    fn test_latch_diff_and_cache() {
        let regs = MockRegisters::new();
        let item = Item::new(0x58, 0b11).inversed();
        let mut state = ItemState::new(&item);
        state.cache = 0b11;

        regs.set(0x58, 0b1111_0001);
        let edge = latch(&regs, &item, &mut state).unwrap();

        assert_eq!(edge, Edge { value: 0b01, asserted: 0b10 });
        assert_eq!(state.cache, 0b01);
        // Masked before the read
        assert_eq!(regs.writes(), alloc::vec![(0x58 + MASK_OFF, 0)]);
    }

    #[test]
    fn test_latch_read_failure_keeps_cache() {
        let regs = MockRegisters::new();
        let item = Item::new(0x58, 0b11);
        let mut state = ItemState::new(&item);
        state.cache = 0b10;

        regs.fail(0x58);
        assert_eq!(latch(&regs, &item, &mut state), Err(AxError::Io));
        assert_eq!(state.cache, 0b10);
    }

    #[test]
    fn test_setup_capability_narrows_mask() {
        let regs = MockRegisters::new();
        let item = fan_item();
        let mut state = ItemState::new(&item);

        regs.set(0x10, 4);
        setup(&regs, &item, &mut state).unwrap();

        assert_eq!(state.active_mask, 0b1111);
        // Inversed: everything starts absent
        assert_eq!(state.cache, 0b1111);
        assert!(regs.writes().contains(&(0x88 + MASK_OFF, 0b1111)));

        // Raw bits 4 and 5 never survive the latch
        regs.set(0x88, 0b0011_1111);
        let edge = latch(&regs, &item, &mut state).unwrap();
        assert_eq!(edge.asserted, 0);
    }

    #[test]
    fn test_setup_zero_capability() {
        let regs = MockRegisters::new();
        let item = fan_item();
        let mut state = ItemState::new(&item);

        regs.set(0x10, 0);
        setup(&regs, &item, &mut state).unwrap();
        assert_eq!(state.active_mask, 0);
    }

    #[test]
    fn test_setup_entry_capability() {
        let regs = MockRegisters::new();
        let item = Item::new(0x30, 0b11)
            .entry(BitEntry::new("pwr1", 0).with_capability(0x20, 0x01))
            .entry(BitEntry::new("pwr2", 1).with_capability(0x20, 0x02));
        let mut state = ItemState::new(&item);

        regs.set(0x20, 0x01);
        setup(&regs, &item, &mut state).unwrap();

        assert_eq!(state.active_mask, 0b01);
        assert_eq!(state.cache, 0);
        // Non-inversed items are not unmasked by setup
        assert!(!regs.writes().iter().any(|&(addr, _)| addr == 0x30 + MASK_OFF));
    }

    #[test]
    fn test_setup_health_entry_capability_masks_field() {
        let regs = MockRegisters::new();
        let item = Item::new(0x50, 0xf0)
            .health()
            .entry(BitEntry::new("asic1", 6))
            .entry(BitEntry::new("asic2", 4).with_capability(0x21, 0x80));
        let mut state = ItemState::new(&item);

        setup(&regs, &item, &mut state).unwrap();
        assert_eq!(state.active_mask, 0xc0);
    }

    #[test]
    fn test_rearm_and_quiesce() {
        let regs = MockRegisters::new();
        let item = Item::new(0x58, 0b11);
        let mut state = ItemState::new(&item);
        state.active_mask = 0b01;

        rearm(&regs, &item, &state).unwrap();
        quiesce(&regs, &item).unwrap();
        assert_eq!(
            regs.writes(),
            alloc::vec![
                (0x58 + EVENT_OFF, 0),
                (0x58 + MASK_OFF, 0b01),
                (0x58 + MASK_OFF, 0),
                (0x58 + EVENT_OFF, 0),
            ]
        );
    }
}
