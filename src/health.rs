//! ASIC health decoding.
//!
//! ASIC health is reported through a 2-bit field. During an ASIC reset the
//! field walks `dormant -> booting -> good`. Only `good` counts as healthy;
//! every other code, `booting` included, is treated as unhealthy.

/// Decoded health field of one ASIC slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HealthState {
    /// Bad health or powered down (`0b00`).
    Dormant = 0b00,
    /// Not reported (`0b01`).
    Unknown = 0b01,
    /// Steady state (`0b10`).
    Good = 0b10,
    /// Coming out of reset (`0b11`).
    Booting = 0b11,
}

/// What the engine must do for one slot after a health scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Slot became good while detached.
    Attach,
    /// Slot left good while attached.
    Detach,
    /// `good -> good` or `non-good -> non-good`.
    Hold,
}

impl HealthState {
    /// Width of the health field in bits.
    pub const FIELD_WIDTH: u8 = 2;
    /// Mask of the health field once shifted down.
    pub const FIELD_MASK: u8 = (1 << Self::FIELD_WIDTH) - 1;

    /// Decodes the low two bits of `bits`.
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & Self::FIELD_MASK {
            0b00 => Self::Dormant,
            0b01 => Self::Unknown,
            0b10 => Self::Good,
            _ => Self::Booting,
        }
    }

    /// Extracts the field whose lowest bit sits at `offset` in `value`.
    #[inline]
    pub const fn extract(value: u8, offset: u8) -> Self {
        Self::from_bits(value >> offset)
    }

    /// Returns the raw 2-bit code.
    #[inline]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Returns `true` only for [`HealthState::Good`].
    #[inline]
    pub const fn is_good(self) -> bool {
        matches!(self, Self::Good)
    }

    /// Decides the transition for a slot currently `attached` or not.
    pub const fn transition(self, attached: bool) -> HealthTransition {
        match (self.is_good(), attached) {
            (true, false) => HealthTransition::Attach,
            (false, true) => HealthTransition::Detach,
            _ => HealthTransition::Hold,
        }
    }
}
