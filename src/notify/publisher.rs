//! Single-subscriber event publisher.

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::sync::Arc;

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use super::wire::{encode_event, EventPayload};

/// Transport that delivers encoded frames to a listener.
pub trait NotifySink: Send + Sync {
    /// Sends `frame` to the listener identified by `pid`.
    fn send(&self, pid: u32, frame: &[u8]) -> AxResult;
}

#[derive(Debug, Default)]
struct Session {
    subscriber: Option<u32>,
    seq: u32,
}

/// Event channel shared by every engine of a registry.
///
/// At most one listener is registered at a time. Engines hold a reference
/// through [`acquire`](Publisher::acquire); the subscription cannot be torn
/// down while anyone besides the owner still holds one.
pub struct Publisher {
    sink: Arc<dyn NotifySink>,
    session: Mutex<Session>,
    refs: AtomicUsize,
}

impl Publisher {
    pub fn new(sink: Arc<dyn NotifySink>) -> Self {
        Self {
            sink,
            session: Mutex::new(Session::default()),
            refs: AtomicUsize::new(0),
        }
    }

    /// Takes a reference on the channel.
    pub fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a reference taken with [`acquire`](Self::acquire).
    pub fn release(&self) {
        let _ = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Current subscriber, if any.
    pub fn subscriber(&self) -> Option<u32> {
        self.session.lock().subscriber
    }

    /// Registers `pid` as the listener.
    pub fn register(&self, pid: u32) -> AxResult {
        let mut session = self.session.lock();
        if let Some(current) = session.subscriber {
            warn!("subscriber {} rejected, {} already registered", pid, current);
            return ax_err!(AlreadyExists, "subscriber already registered");
        }
        session.subscriber = Some(pid);
        info!("subscriber {} registered", pid);
        Ok(())
    }

    /// Drops the current listener.
    pub fn unregister(&self, pid: u32) -> AxResult {
        let refs = self.refs();
        if refs > 1 {
            warn!("unregister from {} rejected, channel has {} users", pid, refs);
            return ax_err!(ResourceBusy, "notification channel in use");
        }
        if let Some(current) = self.session.lock().subscriber.take() {
            info!("subscriber {} unregistered", current);
        }
        Ok(())
    }

    /// Publishes a hardware event. Returns `true` if a frame was delivered.
    pub fn publish(&self, device: u16, slot_nr: i32, label: &str, asserted: bool) -> bool {
        self.send_event(device, slot_nr, label, asserted, false)
    }

    /// Publishes an event injected from outside the scan path.
    pub fn publish_simulated(&self, device: u16, slot_nr: i32, label: &str, asserted: bool) -> bool {
        self.send_event(device, slot_nr, label, asserted, true)
    }

    fn send_event(&self, device: u16, slot_nr: i32, label: &str, asserted: bool, simulated: bool) -> bool {
        let (pid, seq) = {
            let mut session = self.session.lock();
            let Some(pid) = session.subscriber else {
                return false;
            };
            let seq = session.seq;
            session.seq = session.seq.wrapping_add(1);
            (pid, seq)
        };

        let payload = match EventPayload::new(pid, label, slot_nr, asserted, simulated) {
            Ok(payload) => payload,
            Err(err) => {
                error!("{}: cannot encode event: {:?}", label, err);
                return false;
            }
        };

        let frame = encode_event(device, seq, &payload);
        match self.sink.send(pid, &frame) {
            Ok(()) => {
                trace!("{}: event {} sent to {} (seq {})", label, asserted, pid, seq);
                true
            }
            Err(err) => {
                error!("{}: failed to send event to {}: {:?}", label, pid, err);
                false
            }
        }
    }
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("subscriber", &self.subscriber())
            .field("refs", &self.refs())
            .finish()
    }
}
