//! Byte-addressed register access.
//!
//! Every hotplug item is a group of three consecutive 8-bit registers:
//!
//! ```text
//! reg + 0   status  (read)      one bit per unit, or 2-bit health fields
//! reg + 1   event   (write 0)   acknowledges the latched event
//! reg + 2   mask    (write)     1 = event source unmasked
//! ```
//!
//! Aggregation cells use `cell + 0` for status and `cell + 1` for mask.

use axerrno::AxResult;

/// Offset of the event register from an item's status register.
pub const EVENT_OFF: u8 = 1;
/// Offset of the mask register from an item's status register.
pub const MASK_OFF: u8 = 2;
/// Offset of the mask register from an aggregation status register.
pub const AGGR_MASK_OFF: u8 = 1;

/// Register transport consumed by the hotplug engine.
///
/// Implementations perform the actual bus transaction (LPC, I2C, MMIO).
/// The engine may call these from its scan worker only; they are allowed
/// to block.
pub trait RegisterMap: Send + Sync {
    /// Reads one register.
    fn read(&self, addr: u8) -> AxResult<u8>;

    /// Writes one register.
    fn write(&self, addr: u8, val: u8) -> AxResult;
}

/// Returns a mask with the low `count` bits set.
///
/// `count == 0` yields an empty mask, counts of 8 or more a full one.
#[inline]
pub const fn low_bits(count: u8) -> u8 {
    if count >= 8 {
        u8::MAX
    } else {
        (1u8 << count) - 1
    }
}
