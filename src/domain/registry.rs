//! Device Registry
//!
//! Single source of truth for which peripherals are currently discovered and
//! which are connected. A `DeviceId` is never present in both sets at once;
//! every mutation runs under one lock so readers always observe a consistent
//! pair of sets.

use crate::domain::models::{Advertisement, ConnectionHandle, DeviceId, DeviceRecord};
use crate::error::SessionError;
use parking_lot::Mutex;

/// Outcome of applying one advertisement to the discovered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// First sighting, appended to the end of the discovered set.
    New,
    /// Already listed; RSSI refreshed in place, order unchanged.
    Updated,
    /// The device is connected, so the advertisement was discarded.
    IgnoredConnected,
}

#[derive(Default)]
struct Sets {
    // Insertion order doubles as display order, so both are Vecs.
    discovered: Vec<DeviceRecord>,
    connected: Vec<DeviceRecord>,
}

/// Authoritative discovered/connected membership.
#[derive(Default)]
pub struct DeviceRegistry {
    inner: Mutex<Sets>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one advertisement sighting in arrival order.
    ///
    /// Connected devices never re-enter the discovered set; repeat sightings
    /// only refresh the signal strength (last seen wins).
    pub fn observe_advertisement(&self, adv: &Advertisement) -> Sighting {
        let mut sets = self.inner.lock();

        if sets.connected.iter().any(|d| d.id == adv.id) {
            return Sighting::IgnoredConnected;
        }

        if let Some(existing) = sets.discovered.iter_mut().find(|d| d.id == adv.id) {
            existing.rssi = adv.rssi.or(existing.rssi);
            if existing.name.is_none() {
                existing.name = adv.local_name.clone();
            }
            return Sighting::Updated;
        }

        sets.discovered.push(DeviceRecord {
            id: adv.id.clone(),
            name: adv.local_name.clone(),
            rssi: adv.rssi,
            handle: None,
        });
        Sighting::New
    }

    /// Move a device into the connected set, removing it from the discovered
    /// set in the same critical section.
    pub fn move_to_connected(
        &self,
        id: &DeviceId,
        handle: ConnectionHandle,
    ) -> Result<(), SessionError> {
        let mut sets = self.inner.lock();

        if sets.connected.iter().any(|d| &d.id == id) {
            return Err(SessionError::AlreadyConnected(id.clone()));
        }

        let mut record = match sets.discovered.iter().position(|d| &d.id == id) {
            Some(pos) => sets.discovered.remove(pos),
            None => DeviceRecord {
                id: id.clone(),
                name: None,
                rssi: None,
                handle: None,
            },
        };
        record.handle = Some(handle);
        sets.connected.push(record);
        Ok(())
    }

    /// Remove a device from the connected set. It becomes rediscoverable only
    /// through a fresh advertisement, so it is not re-inserted anywhere.
    pub fn move_to_discoverable(&self, id: &DeviceId) -> Option<DeviceRecord> {
        let mut sets = self.inner.lock();
        let pos = sets.connected.iter().position(|d| &d.id == id)?;
        let mut record = sets.connected.remove(pos);
        record.handle = None;
        Some(record)
    }

    /// Drop all discovered (not connected) devices. Called when a new scan
    /// session opens.
    pub fn clear_discovered(&self) {
        self.inner.lock().discovered.clear();
    }

    /// Point-in-time ordered snapshot of the discovered set.
    pub fn discovered(&self) -> Vec<DeviceRecord> {
        self.inner.lock().discovered.clone()
    }

    /// Point-in-time ordered snapshot of the connected set.
    pub fn connected(&self) -> Vec<DeviceRecord> {
        self.inner.lock().connected.clone()
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.inner.lock().connected.iter().any(|d| &d.id == id)
    }

    /// The live connection handle for `id`, if it is connected.
    pub fn connection_handle(&self, id: &DeviceId) -> Option<ConnectionHandle> {
        self.inner
            .lock()
            .connected
            .iter()
            .find(|d| &d.id == id)
            .and_then(|d| d.handle)
    }

    /// The latest discovered record for `id`, if any.
    pub fn discovered_record(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.inner
            .lock()
            .discovered
            .iter()
            .find(|d| &d.id == id)
            .cloned()
    }
}
