//! Static hotplug topology.
//!
//! A [`Topology`] describes one register block: its optional aggregation
//! cells, the [`Item`]s hanging off them, and for every item the
//! [`BitEntry`]s (one per hotpluggable unit). It is board configuration and
//! never changes at runtime; the engine keeps all mutable state (caches,
//! active masks, attachments) on its own side.
//!
//! ```text
//!                          aggregation cell (status/mask)
//!   PSU   item  ------->   *---*
//!   PWR   item  ------->   | * |
//!   FAN   item  ------->   | * |---> interrupt
//!   ASIC  item  ------->   | * |
//!                          *---*
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};

use crate::bus::BoardInfo;
use crate::health::HealthState;
use crate::notify::LABEL_LEN;
use crate::probe::SlotProbe;
use crate::regmap::{AGGR_MASK_OFF, MASK_OFF};

/// A capability register bit gating one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityBit {
    /// Capability register address.
    pub reg: u8,
    /// Bits that must be set for the unit to be populated.
    pub mask: u8,
}

/// Child device to instantiate when a unit appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildDevice {
    /// Bus number before the topology's `bus_shift` is applied.
    pub nr: u32,
    /// Board descriptor passed to instantiation.
    pub board: BoardInfo,
}

/// One hotpluggable unit, mapped to one bit (or one health field) of its item.
#[derive(Debug, Clone)]
pub struct BitEntry {
    /// Label reported in notifications and status attributes.
    pub label: String,
    /// Bit position for presence items, lowest bit of the 2-bit field for
    /// health items.
    pub bit: u8,
    /// Device to attach; `None` for informational units (doorbells,
    /// presence-only indicators, bare ASIC health).
    pub device: Option<ChildDevice>,
    /// Optional per-unit capability bit.
    pub capability: Option<CapabilityBit>,
}

impl BitEntry {
    /// Creates an informational entry at `bit`.
    pub fn new(label: &str, bit: u8) -> Self {
        Self {
            label: String::from(label),
            bit,
            device: None,
            capability: None,
        }
    }

    /// Attaches `board` on bus `nr` when the unit appears.
    pub fn with_device(mut self, nr: u32, board: BoardInfo) -> Self {
        self.device = Some(ChildDevice { nr, board });
        self
    }

    /// Gates the unit on a capability register bit.
    pub fn with_capability(mut self, reg: u8, mask: u8) -> Self {
        self.capability = Some(CapabilityBit { reg, mask });
        self
    }
}

/// A group of units sharing one status register and one aggregation bit.
#[derive(Debug, Clone)]
pub struct Item {
    /// Status register; event and mask registers follow it.
    pub reg: u8,
    /// Bits of the status register that belong to this item.
    pub mask: u8,
    /// Bit(s) of the aggregation cell summarizing this item.
    pub aggr_mask: u8,
    /// Bit clear means present.
    pub inversed: bool,
    /// Units report 2-bit health fields instead of presence bits.
    pub health: bool,
    /// Register advertising how many units are populated.
    pub capability: Option<u8>,
    /// Units, in attribute order.
    pub entries: Vec<BitEntry>,
}

impl Item {
    /// Creates a presence item with non-inverted polarity.
    pub fn new(reg: u8, mask: u8) -> Self {
        Self {
            reg,
            mask,
            aggr_mask: 0,
            inversed: false,
            health: false,
            capability: None,
            entries: Vec::new(),
        }
    }

    /// Sets the aggregation bit(s) of this item.
    pub fn with_aggr_mask(mut self, aggr_mask: u8) -> Self {
        self.aggr_mask = aggr_mask;
        self
    }

    /// Marks the item as bit-clear-means-present.
    pub fn inversed(mut self) -> Self {
        self.inversed = true;
        self
    }

    /// Marks the item as an ASIC health item.
    pub fn health(mut self) -> Self {
        self.health = true;
        self
    }

    /// Narrows the item mask from a population count register.
    pub fn with_capability(mut self, reg: u8) -> Self {
        self.capability = Some(reg);
        self
    }

    /// Appends a unit.
    pub fn entry(mut self, entry: BitEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Finds the entry mapped to `bit`.
    pub fn entry_for_bit(&self, bit: u8) -> Option<usize> {
        self.entries.iter().position(|e| e.bit == bit)
    }

    /// Returns `true` if `bit` of `value` means the unit is present.
    #[inline]
    pub fn is_present(&self, value: u8, bit: u8) -> bool {
        ((value >> bit) & 1 == 1) != self.inversed
    }

    fn validate(&self, index: usize) -> AxResult {
        if self.reg.checked_add(MASK_OFF).is_none() {
            error!("item {}: register {:#04x} leaves no room for event/mask", index, self.reg);
            return ax_err!(InvalidInput, "item register out of range");
        }

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.label.len() >= LABEL_LEN {
                error!("item {}: label {:?} is too long", index, entry.label);
                return ax_err!(InvalidInput, "entry label too long");
            }

            let width = if self.health { HealthState::FIELD_WIDTH } else { 1 };
            if u16::from(entry.bit) + u16::from(width) > 8 {
                error!("item {}: entry {} bit {} out of range", index, i, entry.bit);
                return ax_err!(InvalidInput, "entry bit out of range");
            }

            if self.entries[..i].iter().any(|e| e.bit == entry.bit) {
                error!("item {}: bit {} mapped twice", index, entry.bit);
                return ax_err!(InvalidInput, "duplicate entry bit");
            }
        }

        Ok(())
    }
}

/// An aggregation status register and the bits that are meaningful in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationCell {
    /// Status register; the mask register follows it.
    pub reg: u8,
    /// Meaningful bits.
    pub mask: u8,
}

/// The complete static description of one hotplug register block.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Items, scanned in order.
    pub items: Vec<Item>,
    /// Top-level aggregation cell. Without it every scan visits every item.
    pub cell: Option<AggregationCell>,
    /// Low aggregation cell; only armed and masked, never scanned.
    pub cell_low: Option<AggregationCell>,
    /// Offset added to every child device bus number.
    pub bus_shift: i32,
    /// Bus whose adapter must exist before the engine can be created.
    pub deferred_bus: Option<u32>,
    /// Wait for an explicit ENABLE control message instead of enabling on
    /// registration.
    pub deferred_enable: bool,
    /// Scan gate for topologies without an aggregation cell.
    pub probe: SlotProbe,
}

impl Topology {
    /// Creates a topology with no aggregation cell.
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// Sets the top-level aggregation cell.
    pub fn with_cell(mut self, reg: u8, mask: u8) -> Self {
        self.cell = Some(AggregationCell { reg, mask });
        self
    }

    /// Sets the low aggregation cell.
    pub fn with_cell_low(mut self, reg: u8, mask: u8) -> Self {
        self.cell_low = Some(AggregationCell { reg, mask });
        self
    }

    /// Sets the bus number shift.
    pub fn with_bus_shift(mut self, shift: i32) -> Self {
        self.bus_shift = shift;
        self
    }

    /// Defers engine creation until bus `nr` exists.
    pub fn with_deferred_bus(mut self, nr: u32) -> Self {
        self.deferred_bus = Some(nr);
        self
    }

    /// Defers enabling until an ENABLE control message.
    pub fn deferred(mut self) -> Self {
        self.deferred_enable = true;
        self
    }

    /// Sets the slot probe.
    pub fn with_probe(mut self, probe: SlotProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Total number of units over all items.
    pub fn entry_count(&self) -> usize {
        self.items.iter().map(|item| item.entries.len()).sum()
    }

    /// Checks register ranges, bit ranges and label lengths.
    pub fn validate(&self) -> AxResult {
        for cell in self.cell.iter().chain(self.cell_low.iter()) {
            if cell.reg.checked_add(AGGR_MASK_OFF).is_none() {
                return ax_err!(InvalidInput, "aggregation register out of range");
            }
        }

        for (index, item) in self.items.iter().enumerate() {
            item.validate(index)?;
            if self.cell.is_some() && item.aggr_mask == 0 {
                warn!("item {} has no aggregation bit and will only be scanned on forced rescans", index);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use axerrno::AxError;

    fn psu_item() -> Item {
        Item::new(0x58, 0b11)
            .with_aggr_mask(0x01)
            .inversed()
            .entry(BitEntry::new("psu1", 0).with_device(4, BoardInfo::new("24c02", 0x51)))
            .entry(BitEntry::new("psu2", 1).with_device(4, BoardInfo::new("24c02", 0x50)))
    }

    #[test]
    fn test_polarity() {
        let inversed = psu_item();
        assert!(inversed.is_present(0b10, 0));
        assert!(!inversed.is_present(0b10, 1));

        let normal = Item::new(0x64, 0b11);
        assert!(!normal.is_present(0b10, 0));
        assert!(normal.is_present(0b10, 1));
    }

    #[test]
    fn test_entry_lookup() {
        let item = Item::new(0x40, 0b100).entry(BitEntry::new("doorbell", 2));
        assert_eq!(item.entry_for_bit(2), Some(0));
        assert_eq!(item.entry_for_bit(0), None);
    }

    #[test]
    fn test_validate_ok() {
        let topology = Topology::new(vec![psu_item()]).with_cell(0x3a, 0x01);
        assert!(topology.validate().is_ok());
        assert_eq!(topology.entry_count(), 2);
    }

    #[test]
    fn test_validate_register_overflow() {
        let topology = Topology::new(vec![Item::new(0xfe, 0x01)]);
        assert_eq!(topology.validate(), Err(AxError::InvalidInput));
    }

    #[test]
    fn test_validate_label_too_long() {
        let label = "x".repeat(LABEL_LEN);
        let item = Item::new(0x10, 0x01).entry(BitEntry::new(&label, 0));
        assert_eq!(Topology::new(vec![item]).validate(), Err(AxError::InvalidInput));
    }

    #[test]
    fn test_validate_health_field_range() {
        let item = Item::new(0x50, 0xc0).health().entry(BitEntry::new("asic1", 7));
        assert_eq!(Topology::new(vec![item]).validate(), Err(AxError::InvalidInput));

        let item = Item::new(0x50, 0xc0).health().entry(BitEntry::new("asic1", 6));
        assert!(Topology::new(vec![item]).validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_bit() {
        let item = Item::new(0x10, 0x01)
            .entry(BitEntry::new("a", 0))
            .entry(BitEntry::new("b", 0));
        assert_eq!(Topology::new(vec![item]).validate(), Err(AxError::InvalidInput));
    }
}
