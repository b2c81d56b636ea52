//! Scan Controller
//!
//! Runs at most one time-bounded discovery session against the radio adapter,
//! feeding deduplicated sightings into the device registry.

use crate::domain::models::{AdapterState, DeviceRecord, ScanStopReason, SessionEvent};
use crate::domain::registry::{DeviceRegistry, Sighting};
use crate::error::SessionError;
use crate::infrastructure::adapter::{PermissionGate, RadioAdapter, ScanEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

struct ScanSession {
    stop_tx: oneshot::Sender<()>,
}

/// Opens and closes discovery sessions; one at a time.
pub struct ScanController {
    adapter: Arc<dyn RadioAdapter>,
    permissions: Arc<dyn PermissionGate>,
    registry: Arc<DeviceRegistry>,
    events: mpsc::UnboundedSender<SessionEvent>,
    timeout: Duration,
    active: Arc<Mutex<Option<ScanSession>>>,
}

impl ScanController {
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        permissions: Arc<dyn PermissionGate>,
        registry: Arc<DeviceRegistry>,
        events: mpsc::UnboundedSender<SessionEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            permissions,
            registry,
            events,
            timeout,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a discovery session.
    ///
    /// Calling this while a session is active is a no-op: the existing
    /// session keeps running with its original deadline.
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.active.lock().is_some() {
            debug!("scan already active, ignoring start request");
            return Ok(());
        }

        if !self.permissions.ensure_scan_allowed().await {
            return Err(SessionError::PermissionDenied);
        }

        let state = self.adapter.state().await;
        if matches!(state, AdapterState::PoweredOff | AdapterState::Unauthorized) {
            return Err(SessionError::AdapterNotReady(state));
        }

        // A fresh session always starts from an empty discovered set.
        self.registry.clear_discovered();

        let rx = self.adapter.begin_scan().await?;
        info!(timeout = ?self.timeout, "scan session opened");
        let _ = self.events.send(SessionEvent::ScanStarted);

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.active.lock() = Some(ScanSession { stop_tx });

        tokio::spawn(run_session(
            self.adapter.clone(),
            self.registry.clone(),
            self.events.clone(),
            rx,
            stop_rx,
            self.timeout,
            self.active.clone(),
        ));

        Ok(())
    }

    /// Stop the active session. Stopping while idle is a no-op.
    pub fn stop(&self) {
        if let Some(session) = self.active.lock().take() {
            info!("stopping scan session");
            let _ = session.stop_tx.send(());
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One scan session: applies advertisements in arrival order until exactly
/// one of {manual stop, deadline, radio failure} ends it.
async fn run_session(
    adapter: Arc<dyn RadioAdapter>,
    registry: Arc<DeviceRegistry>,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut rx: mpsc::UnboundedReceiver<ScanEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    timeout: Duration,
    active: Arc<Mutex<Option<ScanSession>>>,
) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = &mut stop_rx => {
                if let Err(e) = adapter.end_scan().await {
                    warn!("end_scan failed on manual stop: {e}");
                }
                break ScanStopReason::Stopped;
            }
            _ = &mut deadline => {
                info!("scan deadline elapsed, closing session");
                if let Err(e) = adapter.end_scan().await {
                    warn!("end_scan failed on timeout: {e}");
                }
                break ScanStopReason::TimedOut;
            }
            event = rx.recv() => match event {
                Some(ScanEvent::Advertisement(adv)) => {
                    match registry.observe_advertisement(&adv) {
                        Sighting::New => {
                            debug!(id = %adv.id, rssi = ?adv.rssi, "discovered device");
                            let _ = events.send(SessionEvent::DeviceDiscovered(DeviceRecord {
                                id: adv.id,
                                name: adv.local_name,
                                rssi: adv.rssi,
                                handle: None,
                            }));
                        }
                        Sighting::Updated => {
                            if let Some(record) = registry.discovered_record(&adv.id) {
                                let _ = events.send(SessionEvent::DeviceUpdated(record));
                            }
                        }
                        Sighting::IgnoredConnected => {}
                    }
                }
                Some(ScanEvent::Failed(e)) => {
                    // The discovered set keeps whatever was collected so far.
                    warn!("radio failed mid-scan: {e}");
                    break ScanStopReason::Failed(e.to_string());
                }
                None => {
                    debug!("advertisement stream closed by backend");
                    if let Err(e) = adapter.end_scan().await {
                        warn!("end_scan failed after stream close: {e}");
                    }
                    break ScanStopReason::Stopped;
                }
            }
        }
    };

    active.lock().take();
    let _ = events.send(SessionEvent::ScanStopped(reason));
}
