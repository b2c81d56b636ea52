//! Integration tests driving `BleSession` against a scripted radio adapter.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use blescout::{
    AdapterError, AdapterState, Advertisement, AlwaysAllowed, BleSession, CharacteristicInfo,
    CharacteristicProps, ConnectOutcome, ConnectionHandle, DeviceId, PermissionGate, RadioAdapter,
    ScanEvent, ScanStopReason, ServiceId, ServiceInfo, SessionConfig, SessionError, SessionEvent,
};

const BATTERY: &str = "0000180f-0000-1000-8000-00805f9b34fb";
const HEART_RATE: &str = "0000180d-0000-1000-8000-00805f9b34fb";

#[derive(Default)]
struct MockInner {
    state: AdapterState,
    scan_tx: Option<mpsc::UnboundedSender<ScanEvent>>,
    state_subscribers: Vec<mpsc::UnboundedSender<AdapterState>>,
    next_handle: u64,
    gated: HashSet<DeviceId>,
    pending: HashMap<DeviceId, oneshot::Sender<Result<(), AdapterError>>>,
    gate_services: bool,
    pending_services: Option<oneshot::Sender<()>>,
    services: Vec<ServiceInfo>,
    characteristics: HashMap<ServiceId, Vec<CharacteristicInfo>>,
}

#[derive(Default)]
struct MockAdapter {
    inner: Mutex<MockInner>,
    connect_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    begin_scan_calls: AtomicUsize,
    end_scan_calls: AtomicUsize,
    service_calls: AtomicUsize,
    characteristic_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    fail_disconnect: AtomicBool,
}

impl MockAdapter {
    fn powered_on() -> Arc<Self> {
        let mock = Self::default();
        mock.inner.lock().state = AdapterState::PoweredOn;
        Arc::new(mock)
    }

    fn with_catalog(self: Arc<Self>) -> Arc<Self> {
        let battery = ServiceInfo {
            id: ServiceId::new(0),
            uuid: Uuid::parse_str(BATTERY).unwrap(),
        };
        let heart_rate = ServiceInfo {
            id: ServiceId::new(1),
            uuid: Uuid::parse_str(HEART_RATE).unwrap(),
        };
        let level = CharacteristicInfo {
            uuid: Uuid::parse_str("00002a19-0000-1000-8000-00805f9b34fb").unwrap(),
            properties: CharacteristicProps {
                read: true,
                notify: true,
                ..Default::default()
            },
        };

        {
            let mut inner = self.inner.lock();
            inner.services = vec![battery.clone(), heart_rate];
            inner.characteristics.insert(battery.id, vec![level]);
        }
        self
    }

    fn set_state(&self, state: AdapterState) {
        self.inner.lock().state = state;
    }

    /// Make `connect(id)` hang until `release(id, ..)` is called.
    fn gate(&self, id: &DeviceId) {
        self.inner.lock().gated.insert(id.clone());
    }

    fn release(&self, id: &DeviceId, result: Result<(), AdapterError>) {
        let tx = self.inner.lock().pending.remove(id);
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }

    fn has_pending(&self, id: &DeviceId) -> bool {
        self.inner.lock().pending.contains_key(id)
    }

    /// Make `enumerate_services` hang until `release_services` is called.
    fn gate_services(&self) {
        self.inner.lock().gate_services = true;
    }

    fn release_services(&self) {
        let tx = self.inner.lock().pending_services.take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    fn has_pending_services(&self) -> bool {
        self.inner.lock().pending_services.is_some()
    }

    fn send_adv(&self, id: &str, rssi: i16) {
        let tx = self.inner.lock().scan_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(ScanEvent::Advertisement(Advertisement {
                id: DeviceId::from(id),
                local_name: Some(format!("dev-{id}")),
                rssi: Some(rssi),
            }));
        }
    }

    fn fail_scan(&self, message: &str) {
        let tx = self.inner.lock().scan_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(ScanEvent::Failed(AdapterError::Backend(message.into())));
        }
    }
}

#[async_trait]
impl RadioAdapter for MockAdapter {
    async fn state(&self) -> AdapterState {
        self.inner.lock().state
    }

    async fn subscribe_state(&self) -> mpsc::UnboundedReceiver<AdapterState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().state_subscribers.push(tx);
        rx
    }

    async fn begin_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, AdapterError> {
        self.begin_scan_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().scan_tx = Some(tx);
        Ok(rx)
    }

    async fn end_scan(&self) -> Result<(), AdapterError> {
        self.end_scan_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().scan_tx = None;
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<ConnectionHandle, AdapterError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let gate = {
            let mut inner = self.inner.lock();
            if inner.gated.contains(id) {
                let (tx, rx) = oneshot::channel();
                inner.pending.insert(id.clone(), tx);
                Some(rx)
            } else {
                None
            }
        };

        if let Some(rx) = gate {
            match rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(AdapterError::Backend("gate dropped".into())),
            }
        }

        let mut inner = self.inner.lock();
        let raw = inner.next_handle;
        inner.next_handle += 1;
        Ok(ConnectionHandle::new(raw))
    }

    async fn cancel_connect(&self, id: &DeviceId) -> Result<(), AdapterError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.release(id, Err(AdapterError::Backend("connection aborted".into())));
        Ok(())
    }

    async fn enumerate_services(
        &self,
        _handle: ConnectionHandle,
    ) -> Result<Vec<ServiceInfo>, AdapterError> {
        self.service_calls.fetch_add(1, Ordering::SeqCst);

        let gate = {
            let mut inner = self.inner.lock();
            if inner.gate_services {
                let (tx, rx) = oneshot::channel();
                inner.pending_services = Some(tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(rx) = gate {
            let _ = rx.await;
        }

        Ok(self.inner.lock().services.clone())
    }

    async fn enumerate_characteristics(
        &self,
        _handle: ConnectionHandle,
        service: ServiceId,
    ) -> Result<Vec<CharacteristicInfo>, AdapterError> {
        self.characteristic_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .lock()
            .characteristics
            .get(&service)
            .cloned()
            .unwrap_or_default())
    }

    async fn disconnect(&self, _handle: ConnectionHandle) -> Result<(), AdapterError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            Err(AdapterError::Backend("link teardown failed".into()))
        } else {
            Ok(())
        }
    }
}

struct Denied;

#[async_trait]
impl PermissionGate for Denied {
    async fn ensure_scan_allowed(&self) -> bool {
        false
    }
}

fn make_session(
    mock: Arc<MockAdapter>,
    config: SessionConfig,
) -> (Arc<BleSession>, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = BleSession::new(mock, Arc::new(AlwaysAllowed), config, tx);
    (Arc::new(session), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn scan_dedups_and_keeps_last_seen_rssi() {
    let mock = MockAdapter::powered_on();
    let (session, mut events) = make_session(mock.clone(), SessionConfig::default());

    session.start_scan().await.unwrap();
    assert!(matches!(next_event(&mut events).await, SessionEvent::ScanStarted));

    mock.send_adv("X", -50);
    mock.send_adv("Y", -70);
    mock.send_adv("X", -45);

    assert!(matches!(next_event(&mut events).await, SessionEvent::DeviceDiscovered(_)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::DeviceDiscovered(_)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::DeviceUpdated(_)));

    let discovered = session.discovered_devices();
    let ids: Vec<&str> = discovered.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["X", "Y"]);
    assert_eq!(discovered[0].rssi, Some(-45));
}

#[tokio::test]
async fn restart_while_scanning_is_a_noop() {
    let mock = MockAdapter::powered_on();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());

    session.start_scan().await.unwrap();
    session.start_scan().await.unwrap();
    assert_eq!(mock.begin_scan_calls.load(Ordering::SeqCst), 1);
    assert!(session.is_scanning());
}

#[tokio::test]
async fn stop_scan_when_idle_is_a_noop() {
    let mock = MockAdapter::powered_on();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());

    session.stop_scan();
    assert!(!session.is_scanning());
    assert_eq!(mock.end_scan_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scan_requires_permission() {
    let mock = MockAdapter::powered_on();
    let (tx, _rx) = mpsc::unbounded_channel();
    let session = BleSession::new(mock.clone(), Arc::new(Denied), SessionConfig::default(), tx);

    assert!(matches!(
        session.start_scan().await,
        Err(SessionError::PermissionDenied)
    ));
    assert_eq!(mock.begin_scan_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scan_requires_powered_adapter() {
    let mock = MockAdapter::powered_on();
    mock.set_state(AdapterState::PoweredOff);
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());

    assert!(matches!(
        session.start_scan().await,
        Err(SessionError::AdapterNotReady(AdapterState::PoweredOff))
    ));
    assert_eq!(mock.begin_scan_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scan_timeout_ends_session_exactly_once() {
    let mock = MockAdapter::powered_on();
    let config = SessionConfig {
        scan_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let (session, mut events) = make_session(mock.clone(), config);

    session.start_scan().await.unwrap();
    assert!(matches!(next_event(&mut events).await, SessionEvent::ScanStarted));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::ScanStopped(ScanStopReason::TimedOut)
    ));

    wait_until(|| !session.is_scanning()).await;
    assert_eq!(mock.end_scan_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scan_failure_keeps_partial_results() {
    let mock = MockAdapter::powered_on();
    let (session, mut events) = make_session(mock.clone(), SessionConfig::default());

    session.start_scan().await.unwrap();
    assert!(matches!(next_event(&mut events).await, SessionEvent::ScanStarted));

    mock.send_adv("X", -50);
    assert!(matches!(next_event(&mut events).await, SessionEvent::DeviceDiscovered(_)));
    mock.fail_scan("radio went away");

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::ScanStopped(ScanStopReason::Failed(_))
    ));
    assert!(!session.is_scanning());
    assert_eq!(session.discovered_devices().len(), 1);
}

#[tokio::test]
async fn connect_moves_device_between_sets() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, mut events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.start_scan().await.unwrap();
    mock.send_adv("X", -50);
    wait_until(|| !session.discovered_devices().is_empty()).await;

    let outcome = session.connect(&x).await.unwrap();
    assert_eq!(outcome, ConnectOutcome::Ready);

    // Connecting stopped the scan and it is not resumed.
    assert!(!session.is_scanning());

    assert!(session.discovered_devices().iter().all(|d| d.id != x));
    let connected = session.connected_devices();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].id, x);
    assert!(connected[0].handle.is_some());

    // Readiness was gated on full enumeration: one service walk plus one
    // characteristic walk per service.
    assert_eq!(mock.service_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.characteristic_calls.load(Ordering::SeqCst), 2);

    let mut saw_connected = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), events.recv()).await
    {
        if matches!(event, SessionEvent::Connected(ref id) if *id == x) {
            saw_connected = true;
            break;
        }
    }
    assert!(saw_connected);
}

#[tokio::test]
async fn second_connect_for_same_device_fails_attempt_in_progress() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    mock.gate(&x);
    let first = {
        let session = session.clone();
        let x = x.clone();
        tokio::spawn(async move { session.connect(&x).await })
    };

    wait_until(|| mock.has_pending(&x)).await;
    assert!(matches!(
        session.connect(&x).await,
        Err(SessionError::AttemptInProgress(_))
    ));

    mock.release(&x, Ok(()));
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome, ConnectOutcome::Ready);
    assert!(session.is_connected(&x));
}

#[tokio::test]
async fn connect_when_ready_fails_without_touching_the_adapter() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.connect(&x).await.unwrap();
    let calls_before = mock.connect_calls.load(Ordering::SeqCst);

    assert!(matches!(
        session.connect(&x).await,
        Err(SessionError::AlreadyConnected(_))
    ));
    assert_eq!(mock.connect_calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn cancelled_attempt_is_suppressed_and_leaves_device_disconnected() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, mut events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    mock.gate(&x);
    let attempt = {
        let session = session.clone();
        let x = x.clone();
        tokio::spawn(async move { session.connect(&x).await })
    };

    wait_until(|| mock.has_pending(&x)).await;
    session.cancel_connect(&x).await;

    let outcome = attempt.await.unwrap().unwrap();
    assert_eq!(outcome, ConnectOutcome::Cancelled);
    assert!(!session.is_connected(&x));

    // No ConnectFailed escapes to observers for a cancelled attempt.
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), events.recv()).await
    {
        assert!(!matches!(event, SessionEvent::ConnectFailed { .. }));
    }
}

#[tokio::test]
async fn cancel_during_enumeration_does_not_yield_ready() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    // The link comes up instantly; the attempt stalls in the readiness gate.
    mock.gate_services();
    let attempt = {
        let session = session.clone();
        let x = x.clone();
        tokio::spawn(async move { session.connect(&x).await })
    };

    wait_until(|| mock.has_pending_services()).await;
    session.cancel_connect(&x).await;
    mock.release_services();

    let outcome = attempt.await.unwrap().unwrap();
    assert_eq!(outcome, ConnectOutcome::Cancelled);
    assert!(!session.is_connected(&x));

    // The half-open link was torn down.
    assert_eq!(mock.disconnect_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_with_no_attempt_in_flight_is_a_noop() {
    let mock = MockAdapter::powered_on();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());

    session.cancel_connect(&DeviceId::from("X")).await;
    assert_eq!(mock.cancel_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_connect_surfaces_error_and_state_is_clean() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    mock.gate(&x);
    let attempt = {
        let session = session.clone();
        let x = x.clone();
        tokio::spawn(async move { session.connect(&x).await })
    };

    wait_until(|| mock.has_pending(&x)).await;
    mock.release(&x, Err(AdapterError::Backend("peer unreachable".into())));

    assert!(matches!(
        attempt.await.unwrap(),
        Err(SessionError::ConnectFailed { .. })
    ));
    assert!(!session.is_connected(&x));

    // The failed attempt is gone; a retry may start immediately.
    mock.inner.lock().gated.clear();
    assert_eq!(session.connect(&x).await.unwrap(), ConnectOutcome::Ready);
}

#[tokio::test]
async fn services_are_memoized_per_connection() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.connect(&x).await.unwrap();

    let first = session.services(&x).await.unwrap();
    let calls_after_first = mock.service_calls.load(Ordering::SeqCst);
    let second = session.services(&x).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(mock.service_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn characteristics_are_fetched_lazily_and_memoized() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");
    let battery = Uuid::parse_str(BATTERY).unwrap();

    session.connect(&x).await.unwrap();
    session.services(&x).await.unwrap();
    let calls_before = mock.characteristic_calls.load(Ordering::SeqCst);

    let chars = session.characteristics(&x, battery).await.unwrap();
    assert_eq!(chars.len(), 1);
    assert!(chars[0].properties.read);
    assert_eq!(
        mock.characteristic_calls.load(Ordering::SeqCst),
        calls_before + 1
    );

    session.characteristics(&x, battery).await.unwrap();
    assert_eq!(
        mock.characteristic_calls.load(Ordering::SeqCst),
        calls_before + 1
    );
}

#[tokio::test]
async fn unknown_service_uuid_is_rejected() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.connect(&x).await.unwrap();
    assert!(matches!(
        session.characteristics(&x, Uuid::new_v4()).await,
        Err(SessionError::UnknownService { .. })
    ));
}

#[tokio::test]
async fn catalog_requires_connection() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());

    assert!(matches!(
        session.services(&DeviceId::from("X")).await,
        Err(SessionError::NotConnected(_))
    ));
}

#[tokio::test]
async fn reconnect_starts_with_an_empty_catalog() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.connect(&x).await.unwrap();
    session.services(&x).await.unwrap();
    assert!(session.catalog().cached_services(&x).is_some());

    session.disconnect(&x).await.unwrap();
    assert!(session.catalog().cached_services(&x).is_none());

    session.connect(&x).await.unwrap();
    // Fresh epoch: nothing cached until the first query of this connection.
    assert!(session.catalog().cached_services(&x).is_none());

    let calls_before = mock.service_calls.load(Ordering::SeqCst);
    session.services(&x).await.unwrap();
    assert_eq!(
        mock.service_calls.load(Ordering::SeqCst),
        calls_before + 1
    );
}

#[tokio::test]
async fn catalog_entry_stays_discarded_after_mid_fetch_disconnect() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.connect(&x).await.unwrap();

    mock.gate_services();
    let fetch = {
        let session = session.clone();
        let x = x.clone();
        tokio::spawn(async move { session.services(&x).await })
    };

    wait_until(|| mock.has_pending_services()).await;
    session.disconnect(&x).await.unwrap();
    mock.release_services();

    // The fetch result is dropped; the closed epoch is not resurrected.
    assert!(matches!(
        fetch.await.unwrap(),
        Err(SessionError::NotConnected(_))
    ));
    assert!(session.catalog().cached_services(&x).is_none());
}

#[tokio::test]
async fn disconnect_cleans_up_even_when_the_adapter_errors() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.connect(&x).await.unwrap();
    mock.fail_disconnect.store(true, Ordering::SeqCst);

    session.disconnect(&x).await.unwrap();
    assert!(!session.is_connected(&x));
    assert!(session.connected_devices().is_empty());
}

#[tokio::test]
async fn disconnecting_an_unconnected_device_fails() {
    let mock = MockAdapter::powered_on();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());

    assert!(matches!(
        session.disconnect(&DeviceId::from("X")).await,
        Err(SessionError::NotConnected(_))
    ));
}

#[tokio::test]
async fn advertisements_from_connected_devices_are_discarded() {
    let mock = MockAdapter::powered_on().with_catalog();
    let (session, _events) = make_session(mock.clone(), SessionConfig::default());
    let x = DeviceId::from("X");

    session.connect(&x).await.unwrap();

    session.start_scan().await.unwrap();
    mock.send_adv("X", -40);
    mock.send_adv("Y", -60);
    wait_until(|| !session.discovered_devices().is_empty()).await;

    let discovered = session.discovered_devices();
    let ids: Vec<&str> = discovered.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["Y"]);
    assert!(session.is_connected(&x));
}
