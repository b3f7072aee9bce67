//! Registry of active hotplug engines.
//!
//! The registry owns the notification [`Publisher`] and maps every
//! [`DeviceId`] to its engine. Inbound control frames are decoded and
//! dispatched here, so neither the publisher nor the engine list is global
//! state.
//!
//! # Concurrency
//!
//! The engine map sits behind a read-write lock. Lookups clone the engine's
//! `Arc` and drop the lock before calling into it, so a long scan or a
//! blocking `disable` never holds the registry.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{ax_err, ax_err_type, AxResult};
use spin::RwLock;

use crate::engine::{DeviceId, HotplugEngine};
use crate::lifecycle::EngineState;
use crate::notify::{ControlMessage, NotifySink, Publisher};

/// Device id to engine map plus the shared notification channel.
pub struct HotplugRegistry {
    engines: RwLock<BTreeMap<DeviceId, Arc<HotplugEngine>>>,
    publisher: Arc<Publisher>,
}

impl HotplugRegistry {
    /// Creates an empty registry delivering events through `sink`.
    pub fn new(sink: Arc<dyn NotifySink>) -> Self {
        Self {
            engines: RwLock::new(BTreeMap::new()),
            publisher: Arc::new(Publisher::new(sink)),
        }
    }

    /// The channel engines of this registry must be created with.
    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Adds an engine and enables it unless its topology defers enabling.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a duplicate id, or whatever `enable` returned; in
    /// both cases the registry is unchanged.
    pub fn insert(&self, engine: Arc<HotplugEngine>) -> AxResult {
        let id = engine.id();
        if self.engines.read().contains_key(&id) {
            return ax_err!(AlreadyExists, "hotplug device already registered");
        }

        self.publisher.acquire();
        if !engine.topology().deferred_enable {
            if let Err(err) = engine.enable() {
                self.publisher.release();
                return Err(err);
            }
        }

        let mut engines = self.engines.write();
        if engines.contains_key(&id) {
            drop(engines);
            if let Err(err) = engine.disable() {
                warn!("{:?}: disable after lost insert race failed: {:?}", id, err);
            }
            self.publisher.release();
            return ax_err!(AlreadyExists, "hotplug device already registered");
        }
        engines.insert(id, engine);
        debug!("{:?} registered", id);
        Ok(())
    }

    /// Removes an engine, disabling it first if needed.
    pub fn remove(&self, id: DeviceId) -> AxResult<Arc<HotplugEngine>> {
        let engine = self
            .engines
            .write()
            .remove(&id)
            .ok_or_else(|| ax_err_type!(NotFound, "hotplug device not found"))?;

        if engine.state() != EngineState::Disabled {
            if let Err(err) = engine.disable() {
                warn!("{:?}: disable on removal failed: {:?}", id, err);
            }
        }
        self.publisher.release();
        debug!("{:?} unregistered", id);
        Ok(engine)
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<HotplugEngine>> {
        self.engines.read().get(&id).cloned()
    }

    fn engine(&self, id: DeviceId) -> AxResult<Arc<HotplugEngine>> {
        self.get(id).ok_or_else(|| {
            warn!("{:?}: no such hotplug device", id);
            ax_err_type!(NotFound, "hotplug device not found")
        })
    }

    /// Forwards an interrupt to the engine `id`.
    pub fn trigger(&self, id: DeviceId) -> AxResult {
        self.engine(id)?.trigger_scan();
        Ok(())
    }

    /// Decodes and dispatches one inbound control frame.
    pub fn handle_control(&self, frame: &[u8]) -> AxResult {
        match ControlMessage::decode(frame)? {
            ControlMessage::Register { pid } => self.publisher.register(pid),
            ControlMessage::Unregister { pid } => self.publisher.unregister(pid),
            ControlMessage::Enable { device, slot } => {
                let engine = self.engine(DeviceId(device))?;
                engine.set_slot(slot);
                engine.enable()
            }
            ControlMessage::Disable { device } => self.engine(DeviceId(device))?.disable(),
        }
    }

    fn snapshot(&self) -> Vec<Arc<HotplugEngine>> {
        self.engines.read().values().cloned().collect()
    }

    /// Runs every scan due at `now`. Returns how many ran.
    pub fn run_pending(&self, now: u64) -> usize {
        self.snapshot()
            .iter()
            .filter(|engine| engine.run_pending(now))
            .count()
    }

    /// Earliest pending deadline over all engines.
    pub fn next_deadline(&self) -> Option<u64> {
        self.engines
            .read()
            .values()
            .filter_map(|engine| engine.next_deadline())
            .min()
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.engines.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }
}
