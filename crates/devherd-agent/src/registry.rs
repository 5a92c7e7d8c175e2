//! In-memory catalog of devices currently visible on this agent
//!
//! The registry is the source of truth for presence/absence. Mutations are
//! serialized under one lock and emit ordered change records consumed by
//! the event notifier; reads hand out copy-on-read snapshots so inspection
//! never blocks during device churn.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use devherd_core::prelude::*;
use devherd_core::{DeviceChange, DeviceInfo};

/// Catalog of devices attached to this agent, keyed by serial number
#[derive(Debug)]
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    devices: HashMap<String, DeviceInfo>,
    changes: mpsc::UnboundedSender<DeviceChange>,
}

impl DeviceRegistry {
    /// Create a registry and the channel its change records are emitted on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            inner: RwLock::new(RegistryInner {
                devices: HashMap::new(),
                changes: tx,
            }),
        };
        (registry, rx)
    }

    /// Insert or replace the snapshot for a serial number
    pub fn upsert(&self, info: DeviceInfo) {
        let mut inner = self.inner.write().expect("device registry lock poisoned");
        debug!("Device {} upserted ({})", info.serial, info.display_name());
        inner.devices.insert(info.serial.clone(), info.clone());
        // Emitted under the lock so per-serial change order is preserved.
        let _ = inner.changes.send(DeviceChange::Up(info));
    }

    /// Remove the device with this serial, returning its last snapshot
    pub fn remove(&self, serial: &str) -> Option<DeviceInfo> {
        let mut inner = self.inner.write().expect("device registry lock poisoned");
        let removed = inner.devices.remove(serial);
        if let Some(last_seen) = &removed {
            debug!("Device {} removed", serial);
            let _ = inner.changes.send(DeviceChange::Down {
                serial: serial.to_string(),
                last_seen: last_seen.clone(),
            });
        }
        removed
    }

    /// Get the latest snapshot for a serial number
    pub fn get(&self, serial: &str) -> Result<DeviceInfo> {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .get(serial)
            .cloned()
            .ok_or_else(|| Error::device_not_found(serial))
    }

    /// Check whether a serial number is currently present
    pub fn exists(&self, serial: &str) -> bool {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .contains_key(serial)
    }

    /// Snapshot of every device currently present
    pub fn list_all(&self) -> Vec<DeviceInfo> {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .values()
            .cloned()
            .collect()
    }

    /// All serial numbers currently present
    pub fn serials(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .keys()
            .cloned()
            .collect()
    }

    /// Check whether any device is present
    pub fn is_any_present(&self) -> bool {
        !self
            .inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .is_empty()
    }

    /// Check whether any emulator is present
    pub fn is_any_emulator_present(&self) -> bool {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .values()
            .any(|d| d.emulator)
    }

    /// First device present, if any
    pub fn first_device(&self) -> Option<DeviceInfo> {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .values()
            .next()
            .cloned()
    }

    /// First emulator present, if any
    pub fn first_emulator(&self) -> Option<DeviceInfo> {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .devices
            .values()
            .find(|d| d.emulator)
            .cloned()
    }
}
