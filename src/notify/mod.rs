//! Event notification channel.
//!
//! Hotplug events leave the crate through a single-subscriber channel. A
//! userspace listener registers itself with a REGISTER control frame and from
//! then on receives one EVENT frame per attach or detach; ENABLE and DISABLE
//! frames address individual engines through the device id carried in the
//! header.
//!
//! ```text
//! ┌──────────────┐  publish()   ┌───────────┐  send(pid, frame)  ┌──────────┐
//! │ HotplugEngine│ ───────────> │ Publisher │ ─────────────────> │ listener │
//! └──────────────┘              └───────────┘                    └────┬─────┘
//!        ^                                                            │
//!        │ enable()/disable()  ┌──────────────────┐  control frames   │
//!        └──────────────────── │ HotplugRegistry  │ <─────────────────┘
//!                              └──────────────────┘
//! ```
//!
//! Delivery is fire-and-forget: send failures are logged and dropped.

mod publisher;
pub mod wire;

pub use publisher::{NotifySink, Publisher};
pub use wire::{ControlMessage, EventPayload, MessageHeader, MessageKind, LABEL_LEN};
