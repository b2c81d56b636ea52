//! Connection Lifecycle Manager
//!
//! Per-device state machine: idle → `Connecting` → `Ready` → disconnected.
//! At most one transition is in flight per device; attempts for distinct
//! devices run independently. Cancellation is cooperative: the intent is
//! recorded before the adapter is asked to abort, and the resulting failure
//! is swallowed instead of being surfaced to the caller.

use crate::domain::models::{ConnectionHandle, DeviceId, SessionEvent};
use crate::domain::registry::DeviceRegistry;
use crate::error::{AdapterError, SessionError};
use crate::infrastructure::adapter::RadioAdapter;
use crate::infrastructure::bluetooth::catalog::CatalogCache;
use crate::infrastructure::bluetooth::scanner::ScanController;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a connection attempt resolved when no error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The device is connected and fully enumerated.
    Ready,
    /// The caller cancelled the attempt; not an error.
    Cancelled,
}

enum Phase {
    Connecting { cancel_requested: bool },
    Ready,
}

/// Drives connect/cancel/disconnect for every device.
pub struct ConnectionLifecycleManager {
    adapter: Arc<dyn RadioAdapter>,
    registry: Arc<DeviceRegistry>,
    catalog: Arc<CatalogCache>,
    scanner: Arc<ScanController>,
    events: mpsc::UnboundedSender<SessionEvent>,
    stop_scan_on_connect: bool,
    phases: Mutex<HashMap<DeviceId, Phase>>,
}

impl ConnectionLifecycleManager {
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        registry: Arc<DeviceRegistry>,
        catalog: Arc<CatalogCache>,
        scanner: Arc<ScanController>,
        events: mpsc::UnboundedSender<SessionEvent>,
        stop_scan_on_connect: bool,
    ) -> Self {
        Self {
            adapter,
            registry,
            catalog,
            scanner,
            events,
            stop_scan_on_connect,
            phases: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to `id` and gate readiness on full service/characteristic
    /// enumeration.
    pub async fn connect(&self, id: &DeviceId) -> Result<ConnectOutcome, SessionError> {
        {
            let mut phases = self.phases.lock();
            match phases.get(id) {
                Some(Phase::Ready) => return Err(SessionError::AlreadyConnected(id.clone())),
                Some(Phase::Connecting { .. }) => {
                    return Err(SessionError::AttemptInProgress(id.clone()))
                }
                None => {}
            }
            if self.registry.is_connected(id) {
                return Err(SessionError::AlreadyConnected(id.clone()));
            }
            phases.insert(
                id.clone(),
                Phase::Connecting {
                    cancel_requested: false,
                },
            );
        }

        // Radio-attention policy: an attempt preempts scanning and the scan
        // is not resumed afterwards.
        if self.stop_scan_on_connect {
            self.scanner.stop();
        }

        info!(id = %id, "connecting");
        let _ = self.events.send(SessionEvent::Connecting(id.clone()));

        let handle = match self.adapter.connect(id).await {
            Ok(handle) => handle,
            Err(e) => return self.finish_failed(id, e),
        };

        // A cancel may have landed while the link came up. The attempt is
        // still treated as cancelled: tear the link down and report nothing.
        if self.cancel_was_requested(id) {
            return self.finish_late_cancel(id, handle).await;
        }

        if let Err(e) = self.enumeration_gate(handle).await {
            if let Err(e2) = self.adapter.disconnect(handle).await {
                debug!(id = %id, "teardown after failed enumeration failed: {e2}");
            }
            return self.finish_failed(id, e);
        }

        // The device stays cancellable for as long as it is Connecting, and
        // the gate can take a while; check the flag again before Ready.
        if self.cancel_was_requested(id) {
            return self.finish_late_cancel(id, handle).await;
        }

        if let Err(e) = self.registry.move_to_connected(id, handle) {
            self.phases.lock().remove(id);
            if let Err(e2) = self.adapter.disconnect(handle).await {
                debug!(id = %id, "teardown after registry rejection failed: {e2}");
            }
            return Err(e);
        }

        // Ready starts a fresh catalog epoch.
        self.catalog.open_epoch(id);
        self.phases.lock().insert(id.clone(), Phase::Ready);

        info!(id = %id, "device ready");
        let _ = self.events.send(SessionEvent::Connected(id.clone()));
        Ok(ConnectOutcome::Ready)
    }

    /// Request cancellation of an in-flight attempt. No-op when nothing is in
    /// flight.
    pub async fn cancel(&self, id: &DeviceId) {
        {
            let mut phases = self.phases.lock();
            match phases.get_mut(id) {
                Some(Phase::Connecting { cancel_requested }) => *cancel_requested = true,
                _ => {
                    debug!(id = %id, "no in-flight attempt, cancel is a no-op");
                    return;
                }
            }
        }

        // Intent is recorded before the abort request goes out, so whatever
        // failure the adapter reports for this attempt is suppressed.
        if let Err(e) = self.adapter.cancel_connect(id).await {
            debug!(id = %id, "cancel_connect reported: {e}");
        }
    }

    /// Disconnect a `Ready` device. Local bookkeeping is cleaned up even when
    /// the adapter call errors, otherwise the entry would be stuck forever.
    pub async fn disconnect(&self, id: &DeviceId) -> Result<(), SessionError> {
        let handle = self
            .registry
            .connection_handle(id)
            .ok_or_else(|| SessionError::NotConnected(id.clone()))?;

        if let Err(e) = self.adapter.disconnect(handle).await {
            warn!(id = %id, "adapter disconnect failed, dropping local state anyway: {e}");
        }

        self.registry.move_to_discoverable(id);
        self.catalog.discard(id);
        self.phases.lock().remove(id);

        info!(id = %id, "disconnected");
        let _ = self.events.send(SessionEvent::Disconnected(id.clone()));
        Ok(())
    }

    /// Whether `id` is in the `Ready` state.
    pub fn is_ready(&self, id: &DeviceId) -> bool {
        matches!(self.phases.lock().get(id), Some(Phase::Ready))
    }

    /// Readiness gate: the device counts as connected only once every service
    /// and characteristic has been walked. Results are discarded here; the
    /// catalog re-fetches lazily with its own memoization.
    async fn enumeration_gate(&self, handle: ConnectionHandle) -> Result<(), AdapterError> {
        let services = self.adapter.enumerate_services(handle).await?;
        for service in &services {
            self.adapter
                .enumerate_characteristics(handle, service.id)
                .await?;
        }
        Ok(())
    }

    /// Resolve an attempt whose link already came up when the cancel was
    /// noticed: tear the handle down and report `Cancelled`.
    async fn finish_late_cancel(
        &self,
        id: &DeviceId,
        handle: ConnectionHandle,
    ) -> Result<ConnectOutcome, SessionError> {
        if let Err(e) = self.adapter.disconnect(handle).await {
            debug!(id = %id, "teardown after late cancel failed: {e}");
        }
        self.phases.lock().remove(id);
        info!(id = %id, "connection attempt cancelled");
        Ok(ConnectOutcome::Cancelled)
    }

    fn cancel_was_requested(&self, id: &DeviceId) -> bool {
        matches!(
            self.phases.lock().get(id),
            Some(Phase::Connecting {
                cancel_requested: true
            })
        )
    }

    /// Resolve a failed attempt: suppressed if cancellation was requested,
    /// surfaced as `ConnectFailed` otherwise.
    fn finish_failed(
        &self,
        id: &DeviceId,
        source: AdapterError,
    ) -> Result<ConnectOutcome, SessionError> {
        let cancelled = matches!(
            self.phases.lock().remove(id),
            Some(Phase::Connecting {
                cancel_requested: true
            })
        );

        if cancelled {
            info!(id = %id, "connection attempt cancelled");
            Ok(ConnectOutcome::Cancelled)
        } else {
            warn!(id = %id, "connection failed: {source}");
            let _ = self.events.send(SessionEvent::ConnectFailed {
                id: id.clone(),
                reason: source.to_string(),
            });
            Err(SessionError::ConnectFailed {
                id: id.clone(),
                source,
            })
        }
    }
}
