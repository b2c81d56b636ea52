//! Radio adapter boundary.
//!
//! The session core never talks to a BLE stack directly; everything goes
//! through [`RadioAdapter`]. The trait mirrors the capability set the core
//! needs (state, scan stream, connect/cancel, enumeration, disconnect) and
//! nothing more, so test suites can substitute a scripted implementation.

use crate::domain::models::{
    AdapterState, Advertisement, CharacteristicInfo, ConnectionHandle, DeviceId, ServiceId,
    ServiceInfo,
};
use crate::error::AdapterError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Item delivered on an open scan subscription.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Advertisement(Advertisement),
    /// The radio failed mid-scan; the session terminates on receipt.
    Failed(AdapterError),
}

/// Async capability set of the underlying BLE central stack.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Current power/authorization state.
    async fn state(&self) -> AdapterState;

    /// Subscribe to state changes. Backends that cannot observe transitions
    /// return a channel that simply never yields.
    async fn subscribe_state(&self) -> mpsc::UnboundedReceiver<AdapterState>;

    /// Open an advertisement subscription. No filter, duplicates collapsed by
    /// the caller.
    async fn begin_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, AdapterError>;

    /// Close the advertisement subscription.
    async fn end_scan(&self) -> Result<(), AdapterError>;

    /// Establish a connection. Resolves when the link is up, or with an error
    /// if the attempt fails or is aborted via [`cancel_connect`].
    ///
    /// [`cancel_connect`]: RadioAdapter::cancel_connect
    async fn connect(&self, id: &DeviceId) -> Result<ConnectionHandle, AdapterError>;

    /// Abort an in-flight connection attempt for `id`, if any.
    async fn cancel_connect(&self, id: &DeviceId) -> Result<(), AdapterError>;

    /// Enumerate the services of a connected peripheral, in discovery order.
    async fn enumerate_services(
        &self,
        handle: ConnectionHandle,
    ) -> Result<Vec<ServiceInfo>, AdapterError>;

    /// Enumerate the characteristics of one service, in discovery order.
    async fn enumerate_characteristics(
        &self,
        handle: ConnectionHandle,
        service: ServiceId,
    ) -> Result<Vec<CharacteristicInfo>, AdapterError>;

    /// Tear down a connection.
    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), AdapterError>;
}

/// Capability check consulted before any scan is started. On platforms with
/// runtime permission prompts this is where the prompt happens.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn ensure_scan_allowed(&self) -> bool;
}

/// Gate for platforms where BLE access needs no runtime prompt.
pub struct AlwaysAllowed;

#[async_trait]
impl PermissionGate for AlwaysAllowed {
    async fn ensure_scan_allowed(&self) -> bool {
        true
    }
}
