//! Mock register map and bus shared by the unit tests.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axerrno::{AxError, AxResult};
use spin::Mutex;

use crate::bus::{AdapterHandle, BoardInfo, BusAdapters, DeviceHandle};
use crate::engine::StatusSink;
use crate::notify::{EventPayload, MessageHeader, NotifySink};
use crate::probe::{PresenceProbe, WakeupProbe};
use crate::regmap::RegisterMap;

/// 256-byte register file with write log and per-address fault injection.
pub struct MockRegisters {
    regs: Mutex<[u8; 256]>,
    writes: Mutex<Vec<(u8, u8)>>,
    reads: AtomicUsize,
    faulty: Mutex<BTreeSet<u8>>,
}

impl MockRegisters {
    pub fn new() -> Self {
        Self {
            regs: Mutex::new([0; 256]),
            writes: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            faulty: Mutex::new(BTreeSet::new()),
        }
    }

    /// Sets a register without logging a write.
    pub fn set(&self, addr: u8, val: u8) {
        self.regs.lock()[addr as usize] = val;
    }

    pub fn get(&self, addr: u8) -> u8 {
        self.regs.lock()[addr as usize]
    }

    /// Makes every access to `addr` fail with `AxError::Io`.
    pub fn fail(&self, addr: u8) {
        self.faulty.lock().insert(addr);
    }

    pub fn heal(&self, addr: u8) {
        self.faulty.lock().remove(&addr);
    }

    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl RegisterMap for MockRegisters {
    fn read(&self, addr: u8) -> AxResult<u8> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.faulty.lock().contains(&addr) {
            return Err(AxError::Io);
        }
        Ok(self.regs.lock()[addr as usize])
    }

    fn write(&self, addr: u8, val: u8) -> AxResult {
        if self.faulty.lock().contains(&addr) {
            return Err(AxError::Io);
        }
        self.writes.lock().push((addr, val));
        // Event and mask registers are write-only in the mock; status
        // registers keep whatever the test put there.
        Ok(())
    }
}

/// Bus with a configurable set of existing adapters.
pub struct MockBus {
    buses: Mutex<BTreeSet<u32>>,
    broken_boards: Mutex<BTreeSet<String>>,
    next: AtomicUsize,
    /// (device token, bus, board name)
    live: Mutex<Vec<(usize, u32, &'static str)>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MockBus {
    pub fn new(buses: &[u32]) -> Self {
        Self {
            buses: Mutex::new(buses.iter().copied().collect()),
            broken_boards: Mutex::new(BTreeSet::new()),
            next: AtomicUsize::new(1),
            live: Mutex::new(Vec::new()),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn add_bus(&self, bus: u32) {
        self.buses.lock().insert(bus);
    }

    /// Makes instantiation of `name` fail.
    pub fn break_board(&self, name: &str) {
        self.broken_boards.lock().insert(String::from(name));
    }

    pub fn fix_board(&self, name: &str) {
        self.broken_boards.lock().remove(name);
    }

    pub fn live(&self) -> Vec<(usize, u32, &'static str)> {
        self.live.lock().clone()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Adapters currently held.
    pub fn held(&self) -> usize {
        self.acquired.load(Ordering::Relaxed) - self.released.load(Ordering::Relaxed)
    }
}

impl BusAdapters for MockBus {
    fn acquire(&self, bus: u32) -> AxResult<AdapterHandle> {
        if !self.buses.lock().contains(&bus) {
            return Err(AxError::NotFound);
        }
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(AdapterHandle::new(bus as usize))
    }

    fn release(&self, _adapter: AdapterHandle) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    fn instantiate(&self, adapter: &AdapterHandle, board: &BoardInfo) -> AxResult<DeviceHandle> {
        if self.broken_boards.lock().contains(board.name) {
            return Err(AxError::Io);
        }
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.live.lock().push((token, adapter.raw() as u32, board.name));
        Ok(DeviceHandle::new(token))
    }

    fn destroy(&self, device: DeviceHandle) {
        self.live.lock().retain(|(token, _, _)| *token != device.raw());
    }
}

/// Notification sink keeping every frame it was handed.
#[derive(Default)]
pub struct MockSink {
    frames: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded `(label, event, simulated)` of every frame, in order.
    pub fn events(&self) -> Vec<(String, bool, bool)> {
        self.frames
            .lock()
            .iter()
            .map(|(_, frame)| {
                let mut body = [0u8; EventPayload::SIZE];
                body.copy_from_slice(&frame[MessageHeader::SIZE..]);
                let payload = EventPayload::deserialize(&body);
                (String::from(payload.label()), payload.event, payload.simulated)
            })
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl NotifySink for MockSink {
    fn send(&self, pid: u32, frame: &[u8]) -> AxResult {
        self.frames.lock().push((pid, frame.to_vec()));
        Ok(())
    }
}

/// Counts state-changed call-outs.
#[derive(Default)]
pub struct MockStatus {
    changes: AtomicUsize,
}

impl MockStatus {
    pub fn changes(&self) -> usize {
        self.changes.load(Ordering::Relaxed)
    }
}

impl StatusSink for MockStatus {
    fn changed(&self) {
        self.changes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Chassis slot with presence and a latched wakeup signal.
pub struct MockSlot {
    pub present: AtomicBool,
    pub wakeup: AtomicBool,
    pub clears: AtomicUsize,
}

impl MockSlot {
    pub fn new(present: bool, wakeup: bool) -> Self {
        Self {
            present: AtomicBool::new(present),
            wakeup: AtomicBool::new(wakeup),
            clears: AtomicUsize::new(0),
        }
    }
}

impl PresenceProbe for MockSlot {
    fn present(&self, _slot: u32) -> bool {
        self.present.load(Ordering::Relaxed)
    }
}

impl WakeupProbe for MockSlot {
    fn signalled(&self, _slot: u32) -> bool {
        self.wakeup.load(Ordering::Relaxed)
    }

    fn clear(&self, _slot: u32) {
        self.clears.fetch_add(1, Ordering::Relaxed);
        self.wakeup.store(false, Ordering::Relaxed);
    }
}
