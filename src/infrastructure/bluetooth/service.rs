//! Session facade
//!
//! `BleSession` wires the registry, scanner, lifecycle manager and catalog
//! cache to one radio adapter and one event channel. It is the public API of
//! the crate; nothing here is a global. Construct it at startup and pass it
//! around.

use crate::domain::models::{
    CharacteristicInfo, DeviceId, DeviceRecord, ServiceInfo, SessionEvent,
};
use crate::domain::registry::DeviceRegistry;
use crate::domain::settings::SessionSettings;
use crate::error::SessionError;
use crate::infrastructure::adapter::{PermissionGate, RadioAdapter};
use crate::infrastructure::bluetooth::catalog::CatalogCache;
use crate::infrastructure::bluetooth::connection::{ConnectOutcome, ConnectionLifecycleManager};
use crate::infrastructure::bluetooth::scanner::ScanController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Runtime knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scan_timeout: Duration,
    pub stop_scan_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            stop_scan_on_connect: true,
        }
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            scan_timeout: settings.scan_timeout(),
            stop_scan_on_connect: settings.stop_scan_on_connect,
        }
    }
}

/// BLE central session manager.
pub struct BleSession {
    registry: Arc<DeviceRegistry>,
    scanner: Arc<ScanController>,
    connections: ConnectionLifecycleManager,
    catalog: Arc<CatalogCache>,
}

impl BleSession {
    /// Build a session. Must be called within a tokio runtime: the adapter
    /// state forwarder is spawned here.
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        permissions: Arc<dyn PermissionGate>,
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let scanner = Arc::new(ScanController::new(
            adapter.clone(),
            permissions,
            registry.clone(),
            events.clone(),
            config.scan_timeout,
        ));
        let catalog = Arc::new(CatalogCache::new(adapter.clone(), registry.clone()));
        let connections = ConnectionLifecycleManager::new(
            adapter.clone(),
            registry.clone(),
            catalog.clone(),
            scanner.clone(),
            events.clone(),
            config.stop_scan_on_connect,
        );

        // Forward radio state transitions to observers.
        let state_adapter = adapter.clone();
        let state_events = events;
        tokio::spawn(async move {
            let mut rx = state_adapter.subscribe_state().await;
            while let Some(state) = rx.recv().await {
                let _ = state_events.send(SessionEvent::AdapterStateChanged(state));
            }
        });

        Self {
            registry,
            scanner,
            connections,
            catalog,
        }
    }

    pub async fn start_scan(&self) -> Result<(), SessionError> {
        self.scanner.start().await
    }

    pub fn stop_scan(&self) {
        self.scanner.stop();
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub async fn connect(&self, id: &DeviceId) -> Result<ConnectOutcome, SessionError> {
        self.connections.connect(id).await
    }

    pub async fn cancel_connect(&self, id: &DeviceId) {
        self.connections.cancel(id).await;
    }

    pub async fn disconnect(&self, id: &DeviceId) -> Result<(), SessionError> {
        self.connections.disconnect(id).await
    }

    pub async fn services(&self, id: &DeviceId) -> Result<Vec<ServiceInfo>, SessionError> {
        self.catalog.services(id).await
    }

    pub async fn characteristics(
        &self,
        id: &DeviceId,
        service_uuid: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, SessionError> {
        self.catalog.characteristics(id, service_uuid).await
    }

    /// Ordered snapshot of the discovered set.
    pub fn discovered_devices(&self) -> Vec<DeviceRecord> {
        self.registry.discovered()
    }

    /// Ordered snapshot of the connected set.
    pub fn connected_devices(&self) -> Vec<DeviceRecord> {
        self.registry.connected()
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.registry.is_connected(id)
    }

    /// Direct access to the catalog, mostly for inspection.
    pub fn catalog(&self) -> &CatalogCache {
        &self.catalog
    }
}
