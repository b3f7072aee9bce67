//! Bus adapter acquisition and child-device instantiation.
//!
//! Hotplugged units (PSU EEPROMs, fan EEPROMs, power controllers) sit behind
//! a numbered bus adapter. When a unit appears the engine acquires the
//! adapter and instantiates a child device from a static board descriptor;
//! when it disappears the child is destroyed and the adapter released.

use axerrno::AxResult;

/// Static description of a child device on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    /// Driver type name, e.g. `"24c02"` or `"dps460"`.
    pub name: &'static str,
    /// Bus address of the device.
    pub addr: u16,
}

impl BoardInfo {
    /// Creates a board descriptor.
    pub const fn new(name: &'static str, addr: u16) -> Self {
        Self { name, addr }
    }
}

/// An acquired bus adapter. Must be handed back through [`BusAdapters::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct AdapterHandle(usize);

impl AdapterHandle {
    /// Wraps a transport-specific adapter token.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the transport-specific adapter token.
    pub const fn raw(&self) -> usize {
        self.0
    }
}

/// A live child device. Must be handed back through [`BusAdapters::destroy`].
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceHandle(usize);

impl DeviceHandle {
    /// Wraps a transport-specific device token.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the transport-specific device token.
    pub const fn raw(&self) -> usize {
        self.0
    }
}

/// Bus adapter provider consumed by the attach/detach manager.
pub trait BusAdapters: Send + Sync {
    /// Acquires the adapter for `bus`.
    ///
    /// Returns `AxError::NotFound` if no such adapter exists (yet).
    fn acquire(&self, bus: u32) -> AxResult<AdapterHandle>;

    /// Releases an adapter obtained from [`acquire`](Self::acquire).
    fn release(&self, adapter: AdapterHandle);

    /// Instantiates a child device on an acquired adapter.
    fn instantiate(&self, adapter: &AdapterHandle, board: &BoardInfo) -> AxResult<DeviceHandle>;

    /// Destroys a child device.
    fn destroy(&self, device: DeviceHandle);
}
