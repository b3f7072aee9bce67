//! Child-device attach and detach.
//!
//! An [`Attachment`] is the proof that a unit is attached. For units that
//! declare a child device it owns the adapter and device handles; for
//! informational units it is a bare marker. Dropping the handles anywhere
//! but [`detach`] would leak them, so `Attachment` is not `Clone`.

use axerrno::{ax_err, AxResult};

use crate::bus::{AdapterHandle, BusAdapters, DeviceHandle};
use crate::topology::BitEntry;

/// A live child device and the adapter it sits on.
#[derive(Debug)]
struct Child {
    adapter: AdapterHandle,
    device: DeviceHandle,
}

/// Attachment record of one unit.
#[derive(Debug)]
pub struct Attachment {
    child: Option<Child>,
}

/// Attaches `entry`'s child device on bus `nr + shift`.
///
/// Entries without a child device attach as a bare marker and never fail.
/// On instantiation failure the adapter is released again before the error
/// is returned.
pub fn attach(bus: &dyn BusAdapters, shift: i32, entry: &BitEntry) -> AxResult<Attachment> {
    let Some(target) = entry.device else {
        return Ok(Attachment { child: None });
    };

    let nr = i64::from(target.nr) + i64::from(shift);
    let Ok(nr) = u32::try_from(nr) else {
        error!("{}: shifted bus number {} is invalid", entry.label, nr);
        return ax_err!(NotFound, "bus number out of range");
    };

    let adapter = bus.acquire(nr).inspect_err(|_| {
        error!("{}: failed to get adapter for bus {}", entry.label, nr);
    })?;

    match bus.instantiate(&adapter, &target.board) {
        Ok(device) => {
            debug!(
                "{}: created {} at bus {} addr {:#04x}",
                entry.label, target.board.name, nr, target.board.addr
            );
            Ok(Attachment {
                child: Some(Child { adapter, device }),
            })
        }
        Err(err) => {
            error!(
                "{}: failed to create client {} at bus {} at addr {:#04x}: {:?}",
                entry.label, target.board.name, nr, target.board.addr, err
            );
            bus.release(adapter);
            Err(err)
        }
    }
}

/// Destroys the child device (if any) and releases its adapter.
pub fn detach(bus: &dyn BusAdapters, attachment: Attachment) {
    if let Some(Child { adapter, device }) = attachment.child {
        bus.destroy(device);
        bus.release(adapter);
    }
}
