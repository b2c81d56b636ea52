//! btleplug-backed radio adapter.
//!
//! Thin translation layer between the [`RadioAdapter`] capability set and the
//! cross-platform `btleplug` central API. All session logic (dedup, caching,
//! lifecycle) lives above this boundary; this module only pumps events,
//! resolves peripherals and mints opaque handles.

use crate::domain::models::{
    AdapterState, Advertisement, CharacteristicInfo, CharacteristicProps, ConnectionHandle,
    DeviceId, ServiceId, ServiceInfo,
};
use crate::error::AdapterError;
use crate::infrastructure::adapter::{RadioAdapter, ScanEvent};
use ::btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
};
use ::btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

fn backend(e: ::btleplug::Error) -> AdapterError {
    AdapterError::Backend(e.to_string())
}

struct ServiceSnapshot {
    info: ServiceInfo,
    characteristics: Vec<CharacteristicInfo>,
}

struct ConnectionState {
    peripheral: Peripheral,
    /// Filled by `enumerate_services`, read by `enumerate_characteristics`.
    services: Vec<ServiceSnapshot>,
}

#[derive(Default)]
struct Inner {
    state: AdapterState,
    peripherals: HashMap<DeviceId, PeripheralId>,
    connections: HashMap<u64, ConnectionState>,
    next_handle: u64,
    scan_tx: Option<mpsc::UnboundedSender<ScanEvent>>,
    state_subscribers: Vec<mpsc::UnboundedSender<AdapterState>>,
}

/// Cross-platform [`RadioAdapter`] over the first system Bluetooth adapter.
pub struct BtleplugRadio {
    adapter: Adapter,
    inner: Arc<Mutex<Inner>>,
}

impl BtleplugRadio {
    /// Grab the default adapter and start the central event pump. Must run
    /// inside a tokio runtime.
    pub async fn new() -> Result<Self, AdapterError> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend)?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Backend("no bluetooth adapter found".into()))?;

        let inner = Arc::new(Mutex::new(Inner::default()));
        let radio = Self {
            adapter: adapter.clone(),
            inner: inner.clone(),
        };

        let events = adapter.events().await.map_err(backend)?;
        tokio::spawn(pump_events(adapter, inner, events));

        Ok(radio)
    }

    fn connection_peripheral(&self, handle: ConnectionHandle) -> Result<Peripheral, AdapterError> {
        self.inner
            .lock()
            .connections
            .get(&handle.raw())
            .map(|c| c.peripheral.clone())
            .ok_or(AdapterError::InvalidHandle)
    }

    async fn find_peripheral(&self, id: &DeviceId) -> Result<Peripheral, AdapterError> {
        let known_pid = self.inner.lock().peripherals.get(id).cloned();
        if let Some(pid) = known_pid {
            if let Ok(peripheral) = self.adapter.peripheral(&pid).await {
                return Ok(peripheral);
            }
        }

        // Not seen by our pump; walk the platform's peripheral list.
        let peripherals = self.adapter.peripherals().await.map_err(backend)?;
        for peripheral in peripherals {
            if peripheral.address().to_string() == id.as_str() {
                return Ok(peripheral);
            }
        }
        Err(AdapterError::DeviceNotFound(id.clone()))
    }
}

/// Long-lived pump translating `CentralEvent`s into advertisements and state
/// notifications.
async fn pump_events(
    adapter: Adapter,
    inner: Arc<Mutex<Inner>>,
    mut events: futures::stream::BoxStream<'static, CentralEvent>,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(pid) | CentralEvent::DeviceUpdated(pid) => {
                let Ok(peripheral) = adapter.peripheral(&pid).await else {
                    continue;
                };
                let props = match peripheral.properties().await {
                    Ok(Some(props)) => props,
                    _ => continue,
                };

                let id = DeviceId::new(props.address.to_string());
                let mut guard = inner.lock();
                guard.peripherals.insert(id.clone(), pid);
                if let Some(tx) = &guard.scan_tx {
                    let _ = tx.send(ScanEvent::Advertisement(Advertisement {
                        id,
                        local_name: props.local_name,
                        rssi: props.rssi,
                    }));
                }
            }
            CentralEvent::StateUpdate(state) => {
                let mapped = match state {
                    CentralState::PoweredOn => AdapterState::PoweredOn,
                    CentralState::PoweredOff => AdapterState::PoweredOff,
                    _ => AdapterState::Unknown,
                };
                debug!(?mapped, "central state update");
                let mut guard = inner.lock();
                guard.state = mapped;
                guard
                    .state_subscribers
                    .retain(|tx| tx.send(mapped).is_ok());
            }
            _ => {}
        }
    }
    debug!("central event stream ended");
}

#[async_trait]
impl RadioAdapter for BtleplugRadio {
    async fn state(&self) -> AdapterState {
        // btleplug only reports transitions on some platforms; Unknown until
        // the first StateUpdate arrives.
        self.inner.lock().state
    }

    async fn subscribe_state(&self) -> mpsc::UnboundedReceiver<AdapterState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().state_subscribers.push(tx);
        rx
    }

    async fn begin_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, AdapterError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(backend)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().scan_tx = Some(tx);
        Ok(rx)
    }

    async fn end_scan(&self) -> Result<(), AdapterError> {
        self.inner.lock().scan_tx = None;
        self.adapter.stop_scan().await.map_err(backend)
    }

    async fn connect(&self, id: &DeviceId) -> Result<ConnectionHandle, AdapterError> {
        let peripheral = self.find_peripheral(id).await?;
        peripheral.connect().await.map_err(backend)?;

        let mut guard = self.inner.lock();
        let raw = guard.next_handle;
        guard.next_handle += 1;
        guard.connections.insert(
            raw,
            ConnectionState {
                peripheral,
                services: Vec::new(),
            },
        );
        Ok(ConnectionHandle::new(raw))
    }

    async fn cancel_connect(&self, id: &DeviceId) -> Result<(), AdapterError> {
        // btleplug has no dedicated cancel primitive; dropping the link
        // aborts a pending attempt on every supported platform.
        let peripheral = self.find_peripheral(id).await?;
        peripheral.disconnect().await.map_err(backend)
    }

    async fn enumerate_services(
        &self,
        handle: ConnectionHandle,
    ) -> Result<Vec<ServiceInfo>, AdapterError> {
        let peripheral = self.connection_peripheral(handle)?;
        peripheral.discover_services().await.map_err(backend)?;

        let mut snapshot = Vec::new();
        let mut infos = Vec::new();
        for (idx, service) in peripheral.services().into_iter().enumerate() {
            let info = ServiceInfo {
                id: ServiceId::new(idx as u32),
                uuid: service.uuid,
            };
            infos.push(info.clone());
            snapshot.push(ServiceSnapshot {
                info,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(characteristic_info)
                    .collect(),
            });
        }

        let mut guard = self.inner.lock();
        match guard.connections.get_mut(&handle.raw()) {
            Some(conn) => conn.services = snapshot,
            None => warn!("connection vanished during service discovery"),
        }
        Ok(infos)
    }

    async fn enumerate_characteristics(
        &self,
        handle: ConnectionHandle,
        service: ServiceId,
    ) -> Result<Vec<CharacteristicInfo>, AdapterError> {
        let guard = self.inner.lock();
        let conn = guard
            .connections
            .get(&handle.raw())
            .ok_or(AdapterError::InvalidHandle)?;
        conn.services
            .iter()
            .find(|s| s.info.id == service)
            .map(|s| s.characteristics.clone())
            .ok_or_else(|| AdapterError::Backend("service not in discovery snapshot".into()))
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), AdapterError> {
        let conn = self
            .inner
            .lock()
            .connections
            .remove(&handle.raw())
            .ok_or(AdapterError::InvalidHandle)?;
        conn.peripheral.disconnect().await.map_err(backend)
    }
}

fn characteristic_info(c: ::btleplug::api::Characteristic) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid: c.uuid,
        properties: CharacteristicProps {
            read: c.properties.contains(CharPropFlags::READ),
            write: c.properties.contains(CharPropFlags::WRITE),
            write_without_response: c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: c.properties.contains(CharPropFlags::NOTIFY),
            indicate: c.properties.contains(CharPropFlags::INDICATE),
        },
    }
}
