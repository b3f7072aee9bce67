//! Hotplug engine: scan, attach and detach for one register block.
//!
//! A [`HotplugEngine`] owns the runtime state of one [`Topology`]. The host
//! forwards interrupts with [`trigger_scan`](HotplugEngine::trigger_scan),
//! which only records a request, and drives the actual work from its own
//! loop with [`run_pending`](HotplugEngine::run_pending):
//!
//! ```text
//! irq ──> trigger_scan() ──> ScanScheduler ──> run_pending(now)
//!                                                  │
//!                    ┌─────────────────────────────┤
//!                    ▼                             ▼
//!           aggregation cell              slot probe gate
//!                    │                             │
//!                    └──────> per-item latch <─────┘
//!                                   │
//!                     presence edges / health fields
//!                                   │
//!                     attach / detach + notification
//! ```
//!
//! With an aggregation cell, a scan that found something asserted leaves the
//! cell masked and re-queues itself; the follow-up pass catches whatever
//! arrived while events were masked and unmasks the cell once nothing is
//! asserted. Without a cell the engine re-arms itself every poll interval.
//!
//! Every `not_asserted_limit` consecutive idle passes the next pass is
//! forced: all items are scanned and every unit is reconciled against its
//! register bit, recovering events lost while masked and retrying failed
//! attaches.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use axerrno::{ax_err, ax_err_type, AxResult};
use spin::Mutex;

use crate::attach;
use crate::bus::BusAdapters;
use crate::config::HotplugConfig;
use crate::health::{HealthState, HealthTransition};
use crate::lifecycle::{EngineLifecycle, EngineState};
use crate::notify::Publisher;
use crate::regmap::{RegisterMap, AGGR_MASK_OFF};
use crate::scan::{self, Edge, EntryState, ItemState};
use crate::scheduler::ScanScheduler;
use crate::stats::HotplugStats;
use crate::topology::{AggregationCell, BitEntry, Item, Topology};

/// Identifier of one engine; travels in the upper half of `msg_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u16);

/// Receives a call-out whenever a unit is attached or detached.
///
/// Called without any engine lock held.
pub trait StatusSink: Send + Sync {
    fn changed(&self);
}

/// One read-only status attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusAttribute<'a> {
    pub item: usize,
    pub index: usize,
    pub label: &'a str,
}

/// Mutable scan state, only touched with the lifecycle in Scanning or
/// Disabling.
struct ScanState {
    items: Vec<ItemState>,
    aggr_cache: u8,
    not_asserted: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct ScanOutcome {
    /// Something was asserted and items were visited.
    productive: bool,
    /// Attach/detach transitions, for the status call-out.
    changes: usize,
}

/// Hotplug engine for one register block.
pub struct HotplugEngine {
    id: DeviceId,
    topology: Arc<Topology>,
    config: HotplugConfig,
    regmap: Arc<dyn RegisterMap>,
    bus: Arc<dyn BusAdapters>,
    status: Option<Arc<dyn StatusSink>>,
    publisher: Arc<Publisher>,
    lifecycle: EngineLifecycle,
    scheduler: ScanScheduler,
    state: Mutex<ScanState>,
    /// Initial enumeration done; gates notifications.
    after_probe: AtomicBool,
    slot: AtomicU32,
    stats: HotplugStats,
}

impl HotplugEngine {
    /// Creates a disabled engine.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the topology is malformed.
    /// - `WouldBlock` if the topology names a deferred bus whose adapter does
    ///   not exist yet; the caller should retry once it does.
    pub fn new(
        id: DeviceId,
        topology: Topology,
        regmap: Arc<dyn RegisterMap>,
        bus: Arc<dyn BusAdapters>,
        publisher: Arc<Publisher>,
    ) -> AxResult<Self> {
        topology.validate()?;

        if let Some(nr) = topology.deferred_bus {
            match bus.acquire(nr) {
                Ok(adapter) => bus.release(adapter),
                Err(_) => {
                    info!("{:?}: bus {} not present yet, deferring", id, nr);
                    return ax_err!(WouldBlock, "deferred bus adapter not present");
                }
            }
        }

        let items = topology.items.iter().map(ItemState::new).collect();
        Ok(Self {
            id,
            topology: Arc::new(topology),
            config: HotplugConfig::default(),
            regmap,
            bus,
            status: None,
            publisher,
            lifecycle: EngineLifecycle::new(),
            scheduler: ScanScheduler::new(),
            state: Mutex::new(ScanState {
                items,
                aggr_cache: 0,
                not_asserted: 0,
            }),
            after_probe: AtomicBool::new(false),
            slot: AtomicU32::new(0),
            stats: HotplugStats::new(),
        })
    }

    pub fn with_config(mut self, config: HotplugConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = Some(sink);
        self
    }

    #[inline]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[inline]
    pub fn config(&self) -> &HotplugConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    #[inline]
    pub fn stats(&self) -> &HotplugStats {
        &self.stats
    }

    /// Returns `true` once the initial enumeration has completed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.after_probe.load(Ordering::Acquire)
    }

    /// Sets the chassis slot passed to the slot probe.
    pub fn set_slot(&self, slot: u32) {
        self.slot.store(slot, Ordering::Release);
    }

    pub fn slot(&self) -> u32 {
        self.slot.load(Ordering::Acquire)
    }

    /// Sets up the registers and runs the initial scan synchronously.
    ///
    /// Units found present are attached, but no notifications are sent for
    /// them. On a setup I/O failure everything is masked again and the
    /// error is returned.
    pub fn enable(&self) -> AxResult {
        if let Err(state) = self.lifecycle.try_begin_enable() {
            warn!("{:?}: enable rejected in state {:?}", self.id, state);
            return ax_err!(BadState, "hotplug engine already enabled");
        }

        let mut state = self.state.lock();
        if let Err(err) = self.setup(&mut state) {
            error!("{:?}: setup failed: {:?}", self.id, err);
            let outcome = self.teardown(&mut state, false);
            drop(state);
            self.scheduler.cancel();
            self.lifecycle.abort_enable();
            self.signal_changes(outcome.changes);
            return Err(err);
        }

        let outcome = self.scan(&mut state);
        self.after_probe.store(true, Ordering::Release);
        drop(state);

        if self.topology.cell.is_none() || outcome.productive {
            self.scheduler.arm_by(0);
        }
        self.lifecycle.end_scan();
        self.signal_changes(outcome.changes);

        info!("{:?}: enabled, {} units", self.id, self.topology.entry_count());
        Ok(())
    }

    /// Masks all events, waits for an in-flight scan and detaches every
    /// attached unit.
    ///
    /// Each detach is published under the same gate as a scan-time removal.
    pub fn disable(&self) -> AxResult {
        if !self.lifecycle.begin_disable() {
            return ax_err!(BadState, "hotplug engine not enabled");
        }

        self.scheduler.cancel();
        let notify = self.is_ready()
            && (self.topology.cell.is_some()
                || self.topology.probe.signalled(self.slot()) == Some(true));
        let outcome = {
            let mut state = self.state.lock();
            self.teardown(&mut state, notify)
        };
        self.after_probe.store(false, Ordering::Release);
        self.lifecycle.complete_disable();
        self.signal_changes(outcome.changes);

        info!("{:?}: disabled", self.id);
        Ok(())
    }

    /// Requests a scan. Never blocks and never touches registers.
    pub fn trigger_scan(&self) {
        if self.lifecycle.is_enabled() {
            self.scheduler.trigger();
        } else {
            trace!("{:?}: trigger ignored in state {:?}", self.id, self.state());
        }
    }

    /// Deadline of the pending scan request, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    /// Runs the pending scan if it is due at `now` (nanoseconds).
    ///
    /// Returns `true` if a scan ran. A request that comes due while another
    /// thread is scanning is put back and picked up on the next call.
    pub fn run_pending(&self, now: u64) -> bool {
        if !self.scheduler.take_due(now) {
            return false;
        }

        if !self.lifecycle.try_begin_scan() {
            // The other scan may already have ended; requeue unless disabling.
            if self.lifecycle.is_enabled() {
                self.scheduler.arm_by(now);
            }
            return false;
        }

        let outcome = {
            let mut state = self.state.lock();
            self.scan(&mut state)
        };

        if self.topology.cell.is_none() {
            if self.is_ready() {
                self.scheduler
                    .arm_by(now.saturating_add(self.config.poll_interval_ns));
            }
        } else if outcome.productive {
            self.scheduler
                .arm_by(now.saturating_add(self.config.rescan_delay_ns));
        }

        self.lifecycle.end_scan();
        self.signal_changes(outcome.changes);
        true
    }

    /// Sends an EVENT marked as simulated. Only requires a subscriber.
    pub fn publish_simulated(&self, slot_nr: i32, asserted: bool, label: &str) -> bool {
        let sent = self
            .publisher
            .publish_simulated(self.id.0, slot_nr, label, asserted);
        if sent {
            self.stats.record_event();
        }
        sent
    }

    /// Every status attribute of this engine, in topology order.
    pub fn status_attributes(&self) -> Vec<StatusAttribute<'_>> {
        self.topology
            .items
            .iter()
            .enumerate()
            .flat_map(|(item, it)| {
                it.entries
                    .iter()
                    .enumerate()
                    .map(move |(index, entry)| StatusAttribute {
                        item,
                        index,
                        label: entry.label.as_str(),
                    })
            })
            .collect()
    }

    /// Reads the live status of one unit: 1 if present (or healthy).
    pub fn read_status(&self, item: usize, index: usize) -> AxResult<u8> {
        let (it, entry) = self.lookup(item, index)?;
        let value = self.regmap.read(it.reg)?;
        let up = if it.health {
            HealthState::extract(value, entry.bit).is_good()
        } else {
            it.is_present(value, entry.bit)
        };
        Ok(up as u8)
    }

    /// Reads the live health field of one unit of a health item.
    pub fn read_health(&self, item: usize, index: usize) -> AxResult<HealthState> {
        let (it, entry) = self.lookup(item, index)?;
        if !it.health {
            return ax_err!(InvalidInput, "not a health item");
        }
        Ok(HealthState::extract(self.regmap.read(it.reg)?, entry.bit))
    }

    /// Whether a unit is attached; `None` for an unknown unit.
    pub fn attached(&self, item: usize, index: usize) -> Option<bool> {
        self.with_entry(item, index, EntryState::attached)
    }

    pub fn health_counter(&self, item: usize, index: usize) -> Option<u32> {
        self.with_entry(item, index, |entry| entry.health_cntr)
    }

    /// Masked status of `item` as of its last successful scan.
    pub fn cached(&self, item: usize) -> Option<u8> {
        self.state.lock().items.get(item).map(|s| s.cache)
    }

    /// Item mask after capability narrowing.
    pub fn active_mask(&self, item: usize) -> Option<u8> {
        self.state.lock().items.get(item).map(|s| s.active_mask)
    }

    /// Consecutive passes that found nothing asserted.
    pub fn not_asserted(&self) -> u32 {
        self.state.lock().not_asserted
    }

    fn with_entry<T>(&self, item: usize, index: usize, f: impl FnOnce(&EntryState) -> T) -> Option<T> {
        let state = self.state.lock();
        state.items.get(item)?.entries.get(index).map(f)
    }

    fn lookup(&self, item: usize, index: usize) -> AxResult<(&Item, &BitEntry)> {
        let it = self
            .topology
            .items
            .get(item)
            .ok_or_else(|| ax_err_type!(NotFound, "no such item"))?;
        let entry = it
            .entries
            .get(index)
            .ok_or_else(|| ax_err_type!(NotFound, "no such unit"))?;
        Ok((it, entry))
    }

    fn signal_changes(&self, changes: usize) {
        if let Some(sink) = &self.status {
            for _ in 0..changes {
                sink.changed();
            }
        }
    }

    fn setup(&self, state: &mut ScanState) -> AxResult {
        state.aggr_cache = 0;
        state.not_asserted = 0;

        for (item, item_state) in self.topology.items.iter().zip(state.items.iter_mut()) {
            scan::setup(&*self.regmap, item, item_state)?;
        }

        for cell in self.topology.cell.iter().chain(self.topology.cell_low.iter()) {
            self.regmap.write(cell.reg + AGGR_MASK_OFF, cell.mask)?;
        }
        Ok(())
    }

    fn teardown(&self, state: &mut ScanState, notify: bool) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        for cell in self.topology.cell_low.iter().chain(self.topology.cell.iter()) {
            if let Err(err) = self.regmap.write(cell.reg + AGGR_MASK_OFF, 0) {
                self.stats.record_io_error();
                warn!("{:?}: failed to mask aggregation {:#04x}: {:?}", self.id, cell.reg, err);
            }
        }

        for (item, item_state) in self.topology.items.iter().zip(state.items.iter_mut()) {
            if let Err(err) = scan::quiesce(&*self.regmap, item) {
                self.stats.record_io_error();
                warn!("{:?}: failed to mask item {:#04x}: {:?}", self.id, item.reg, err);
            }
            for (entry, entry_state) in item.entries.iter().zip(item_state.entries.iter_mut()) {
                if entry_state.attached() {
                    self.detach_entry(entry, entry_state, notify, &mut outcome);
                }
            }
        }
        outcome
    }

    fn scan(&self, state: &mut ScanState) -> ScanOutcome {
        let outcome = match self.topology.cell {
            Some(cell) => self.scan_aggregated(state, cell),
            None => self.scan_gated(state),
        };
        self.stats.record_scan();
        outcome
    }

    fn take_forced(&self, state: &mut ScanState) -> bool {
        if state.not_asserted < u32::from(self.config.not_asserted_limit) {
            return false;
        }
        state.not_asserted = 0;
        self.stats.record_forced();
        debug!("{:?}: nothing asserted for a while, forcing full rescan", self.id);
        true
    }

    fn scan_aggregated(&self, state: &mut ScanState, cell: AggregationCell) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        let aggr = match self.latch_aggregation(cell) {
            Ok(value) => value,
            Err(err) => {
                self.stats.record_io_error();
                error!("{:?}: failed to read aggregation {:#04x}: {:?}", self.id, cell.reg, err);
                state.not_asserted = state.not_asserted.saturating_add(1);
                self.unmask_aggregation(cell);
                return outcome;
            }
        };

        let mut aggr_asserted = state.aggr_cache ^ aggr;
        state.aggr_cache = aggr;

        let forced = self.take_forced(state);
        if forced {
            aggr_asserted = cell.mask;
        }

        if aggr_asserted == 0 {
            state.not_asserted = state.not_asserted.saturating_add(1);
            self.unmask_aggregation(cell);
            return outcome;
        }

        debug!("{:?}: aggregation {:#04x} asserted {:#04x}", self.id, aggr, aggr_asserted);
        state.not_asserted = 0;
        outcome.productive = true;

        let notify = self.is_ready();
        for (item, item_state) in self.topology.items.iter().zip(state.items.iter_mut()) {
            if forced || aggr_asserted & item.aggr_mask != 0 {
                self.scan_item(item, item_state, forced, notify, &mut outcome);
            }
        }
        outcome
    }

    fn latch_aggregation(&self, cell: AggregationCell) -> AxResult<u8> {
        self.regmap.write(cell.reg + AGGR_MASK_OFF, 0)?;
        Ok(self.regmap.read(cell.reg)? & cell.mask)
    }

    fn unmask_aggregation(&self, cell: AggregationCell) {
        if let Err(err) = self.regmap.write(cell.reg + AGGR_MASK_OFF, cell.mask) {
            self.stats.record_io_error();
            error!("{:?}: failed to unmask aggregation {:#04x}: {:?}", self.id, cell.reg, err);
        }
    }

    fn scan_gated(&self, state: &mut ScanState) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let probe = &self.topology.probe;
        let slot = self.slot();

        if !probe.present(slot) {
            trace!("{:?}: slot {} empty, scan skipped", self.id, slot);
            state.not_asserted = state.not_asserted.saturating_add(1);
            return outcome;
        }

        let forced = self.take_forced(state);
        let ready = self.is_ready();
        let signalled = probe.signalled(slot);
        if signalled == Some(false) && ready && !forced {
            trace!("{:?}: slot {} not signalled, scan skipped", self.id, slot);
            state.not_asserted = state.not_asserted.saturating_add(1);
            return outcome;
        }

        let notify = ready && signalled == Some(true);
        let mut changed = false;
        for (item, item_state) in self.topology.items.iter().zip(state.items.iter_mut()) {
            changed |= self.scan_item(item, item_state, forced, notify, &mut outcome);
            probe.clear(slot);
        }

        if changed {
            state.not_asserted = 0;
            outcome.productive = true;
        } else if !forced {
            state.not_asserted = state.not_asserted.saturating_add(1);
        }
        outcome
    }

    /// Latches one item and acts on it. Returns `true` if its value changed.
    fn scan_item(
        &self,
        item: &Item,
        state: &mut ItemState,
        forced: bool,
        notify: bool,
        outcome: &mut ScanOutcome,
    ) -> bool {
        let edge = match scan::latch(&*self.regmap, item, state) {
            Ok(edge) => edge,
            Err(err) => {
                self.stats.record_io_error();
                error!("{:?}: failed to scan item {:#04x}: {:?}", self.id, item.reg, err);
                return false;
            }
        };

        if item.health {
            if edge.changed() || forced {
                self.apply_health(item, state, edge.value, notify, outcome);
            }
        } else if forced {
            self.reconcile(item, state, edge.value, notify, outcome);
        } else {
            self.apply_edges(item, state, edge, notify, outcome);
        }

        if let Err(err) = scan::rearm(&*self.regmap, item, state) {
            self.stats.record_io_error();
            error!("{:?}: failed to re-arm item {:#04x}: {:?}", self.id, item.reg, err);
        }
        edge.changed()
    }

    fn apply_edges(&self, item: &Item, state: &mut ItemState, edge: Edge, notify: bool, outcome: &mut ScanOutcome) {
        for bit in edge.asserted_bits() {
            let Some(pos) = item.entry_for_bit(bit) else {
                warn!("{:?}: item {:#04x} bit {} has no unit", self.id, item.reg, bit);
                continue;
            };
            let entry = &item.entries[pos];
            let entry_state = &mut state.entries[pos];

            if item.is_present(edge.value, bit) {
                if !entry_state.attached() {
                    self.attach_entry(entry, entry_state, notify, outcome);
                }
            } else {
                self.detach_entry(entry, entry_state, notify, outcome);
            }
        }
    }

    /// Brings every unit in the active mask in line with its register bit.
    fn reconcile(&self, item: &Item, state: &mut ItemState, value: u8, notify: bool, outcome: &mut ScanOutcome) {
        let active = state.active_mask;
        for (entry, entry_state) in item.entries.iter().zip(state.entries.iter_mut()) {
            if active & scan::entry_mask(item, entry) == 0 {
                continue;
            }
            let present = item.is_present(value, entry.bit);
            if present && !entry_state.attached() {
                self.attach_entry(entry, entry_state, notify, outcome);
            } else if !present && entry_state.attached() {
                self.detach_entry(entry, entry_state, notify, outcome);
            }
        }
    }

    fn apply_health(&self, item: &Item, state: &mut ItemState, value: u8, notify: bool, outcome: &mut ScanOutcome) {
        let active = state.active_mask;
        for (entry, entry_state) in item.entries.iter().zip(state.entries.iter_mut()) {
            if active & scan::entry_mask(item, entry) == 0 {
                continue;
            }

            let health = HealthState::extract(value, entry.bit);
            if health.is_good() {
                entry_state.health_cntr = entry_state.health_cntr.saturating_add(1);
            }
            trace!("{}: health {:?}", entry.label, health);

            match health.transition(entry_state.attached()) {
                HealthTransition::Attach => self.attach_entry(entry, entry_state, notify, outcome),
                HealthTransition::Detach => self.detach_entry(entry, entry_state, notify, outcome),
                HealthTransition::Hold => {}
            }
        }
    }

    fn attach_entry(&self, entry: &BitEntry, state: &mut EntryState, notify: bool, outcome: &mut ScanOutcome) {
        self.notify(entry, true, notify);
        outcome.changes += 1;

        match attach::attach(&*self.bus, self.topology.bus_shift, entry) {
            Ok(attachment) => {
                info!("{:?}: {} attached", self.id, entry.label);
                state.attachment = Some(attachment);
                self.stats.record_attach();
            }
            Err(_) => self.stats.record_attach_error(),
        }
    }

    fn detach_entry(&self, entry: &BitEntry, state: &mut EntryState, notify: bool, outcome: &mut ScanOutcome) {
        self.notify(entry, false, notify);
        outcome.changes += 1;

        if let Some(attachment) = state.attachment.take() {
            attach::detach(&*self.bus, attachment);
            info!("{:?}: {} detached", self.id, entry.label);
            self.stats.record_detach();
        }
        state.health_cntr = 0;
    }

    fn notify(&self, entry: &BitEntry, asserted: bool, enabled: bool) {
        if enabled && self.publisher.publish(self.id.0, i32::from(self.id.0), &entry.label, asserted) {
            self.stats.record_event();
        }
    }
}

impl core::fmt::Debug for HotplugEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HotplugEngine")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
