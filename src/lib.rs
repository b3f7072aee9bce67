#![no_std]

//! # Hotplug engine for register-mapped FRUs
//!
//! This crate detects insertion, removal and health changes of
//! field-replaceable units (power supplies, fans, line cards, ASICs) behind
//! a byte-addressed register block, attaches and detaches their child
//! devices, and publishes events to a single userspace listener.
//! It is designed for `no_std` environments and uses the `alloc` crate for
//! dynamic memory allocation.
//!
//! ## Architecture
//!
//! ### Board description
//! - [`Topology`]: aggregation cells, [`Item`]s and their [`BitEntry`]s
//! - [`HotplugConfig`]: poll interval, validation delay, forced-rescan limit
//!
//! ### Engine
//! - [`HotplugEngine`]: setup, scan, attach/detach, teardown for one block
//! - [`ScanScheduler`]: coalescing single-slot scan requests
//! - [`EngineLifecycle`]: Disabled/Idle/Scanning/Disabling state machine
//! - [`HealthState`]: 2-bit ASIC health decoding
//!
//! ### Notification
//! - [`Publisher`]: single-subscriber event channel
//! - [`ControlMessage`]: REGISTER/UNREGISTER/ENABLE/DISABLE frames
//! - [`HotplugRegistry`]: device id to engine map, control dispatch
//!
//! ### Collaborators
//! The register transport ([`RegisterMap`]), bus adapters ([`BusAdapters`]),
//! slot probes ([`SlotProbe`]), the event transport ([`NotifySink`]) and the
//! status-attribute layer ([`StatusSink`]) are supplied by the platform.
//!
//! ## Examples
//!
//! ```rust,ignore
//! use axhotplug::*;
//!
//! let registry = HotplugRegistry::new(netlink_sink);
//!
//! let topology = Topology::new(vec![
//!     Item::new(0x58, 0x03)
//!         .with_aggr_mask(0x08)
//!         .inversed()
//!         .entry(BitEntry::new("psu1", 0).with_device(4, BoardInfo::new("24c02", 0x51)))
//!         .entry(BitEntry::new("psu2", 1).with_device(4, BoardInfo::new("24c02", 0x50))),
//!     Item::new(0x88, 0x3f).with_aggr_mask(0x40).inversed().with_capability(0xe2),
//! ])
//! .with_cell(0x3a, 0x4c);
//!
//! let engine = HotplugEngine::new(DeviceId(1), topology, regmap, i2c, registry.publisher().clone())?
//!     .with_config(HotplugConfig::default());
//! registry.insert(Arc::new(engine))?;
//!
//! // Interrupt handler
//! registry.trigger(DeviceId(1))?;
//!
//! // Worker loop
//! loop {
//!     registry.run_pending(monotonic_ns());
//!     sleep_until(registry.next_deadline());
//! }
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

mod attach;
mod bus;
mod config;
mod engine;
mod health;
mod lifecycle;
pub mod notify;
mod probe;
mod registry;
mod regmap;
mod scan;
mod scheduler;
mod stats;
mod topology;

#[cfg(test)]
mod testing;

pub use bus::{AdapterHandle, BoardInfo, BusAdapters, DeviceHandle};
pub use config::{HotplugConfig, DEFAULT_NOT_ASSERTED_LIMIT};
pub use engine::{DeviceId, HotplugEngine, StatusAttribute, StatusSink};
pub use health::{HealthState, HealthTransition};
pub use lifecycle::{EngineLifecycle, EngineState};
pub use probe::{PresenceProbe, SlotProbe, WakeupProbe};
pub use registry::HotplugRegistry;
pub use regmap::{low_bits, RegisterMap, AGGR_MASK_OFF, EVENT_OFF, MASK_OFF};
pub use scheduler::ScanScheduler;
pub use stats::HotplugStats;
pub use topology::{AggregationCell, BitEntry, CapabilityBit, ChildDevice, Item, Topology};

// Re-export the notification channel types
pub use notify::{ControlMessage, EventPayload, MessageHeader, MessageKind, NotifySink, Publisher, LABEL_LEN};
