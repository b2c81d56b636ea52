//! Catalog Cache
//!
//! Lazy, memoized service/characteristic tree per connected device. An entry
//! lives for exactly one connection epoch: it is opened empty when the device
//! becomes ready and discarded on disconnect, so a reconnect always
//! re-discovers.

use crate::domain::models::{CharacteristicInfo, DeviceId, ServiceInfo};
use crate::domain::registry::DeviceRegistry;
use crate::error::SessionError;
use crate::infrastructure::adapter::RadioAdapter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct CatalogEntry {
    /// `None` until the first `services()` call of this epoch.
    services: Option<Vec<ServiceInfo>>,
    /// Fetched per service on first expansion.
    characteristics: HashMap<Uuid, Vec<CharacteristicInfo>>,
}

/// On-demand GATT catalog, keyed by `DeviceId`, backed by the registry's
/// live connection handles.
pub struct CatalogCache {
    adapter: Arc<dyn RadioAdapter>,
    registry: Arc<DeviceRegistry>,
    entries: Mutex<HashMap<DeviceId, CatalogEntry>>,
}

impl CatalogCache {
    pub fn new(adapter: Arc<dyn RadioAdapter>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            adapter,
            registry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start a fresh, empty entry for a newly ready device.
    pub fn open_epoch(&self, id: &DeviceId) {
        self.entries.lock().insert(id.clone(), CatalogEntry::default());
    }

    /// Drop the entry for a disconnecting device.
    pub fn discard(&self, id: &DeviceId) {
        if self.entries.lock().remove(id).is_some() {
            debug!(id = %id, "catalog entry discarded");
        }
    }

    /// The memoized service list, without querying the adapter. `None` means
    /// nothing has been fetched this epoch.
    pub fn cached_services(&self, id: &DeviceId) -> Option<Vec<ServiceInfo>> {
        self.entries.lock().get(id).and_then(|e| e.services.clone())
    }

    /// Ordered services of a connected device; queried once per epoch.
    pub async fn services(&self, id: &DeviceId) -> Result<Vec<ServiceInfo>, SessionError> {
        let handle = self
            .registry
            .connection_handle(id)
            .ok_or_else(|| SessionError::NotConnected(id.clone()))?;

        if let Some(cached) = self.cached_services(id) {
            return Ok(cached);
        }

        // A failed fetch stores nothing: the next call retries.
        let fetched = self.adapter.enumerate_services(handle).await?;
        debug!(id = %id, count = fetched.len(), "services fetched");

        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            // The device disconnected while the fetch was in flight; the
            // epoch is over and the result is dropped.
            None => Err(SessionError::NotConnected(id.clone())),
            Some(entry) => match &entry.services {
                // A concurrent fetch won the race; keep the first result.
                Some(existing) => Ok(existing.clone()),
                None => {
                    entry.services = Some(fetched.clone());
                    Ok(fetched)
                }
            },
        }
    }

    /// Ordered characteristics of one service; fetched on first expansion.
    pub async fn characteristics(
        &self,
        id: &DeviceId,
        service_uuid: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, SessionError> {
        let services = self.services(id).await?;
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or(SessionError::UnknownService {
                id: id.clone(),
                service: service_uuid,
            })?;

        if let Some(cached) = self
            .entries
            .lock()
            .get(id)
            .and_then(|e| e.characteristics.get(&service_uuid).cloned())
        {
            return Ok(cached);
        }

        let handle = self
            .registry
            .connection_handle(id)
            .ok_or_else(|| SessionError::NotConnected(id.clone()))?;

        let fetched = self
            .adapter
            .enumerate_characteristics(handle, service.id)
            .await?;
        debug!(id = %id, service = %service_uuid, count = fetched.len(), "characteristics fetched");

        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            None => Err(SessionError::NotConnected(id.clone())),
            Some(entry) => Ok(entry
                .characteristics
                .entry(service_uuid)
                .or_insert(fetched)
                .clone()),
        }
    }
}
