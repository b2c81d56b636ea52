//! Core data model shared by the registry, scanner, lifecycle manager and
//! catalog cache.

use std::fmt;
use uuid::Uuid;

/// Stable identifier for a physical peripheral, derived from its address.
///
/// Equality on `DeviceId` is the membership key for every set and map in the
/// session manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Opaque token for an established connection, minted by the radio backend.
/// Valid only for the lifetime of one connection epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque per-connection token identifying a discovered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(u32);

impl ServiceId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }
}

/// What the session manager knows about one peripheral.
///
/// Created on first advertisement sighting; `handle` is populated only while
/// the device is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub handle: Option<ConnectionHandle>,
}

impl DeviceRecord {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }
}

/// One GATT service as reported by the radio backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub uuid: Uuid,
}

/// Property flags of a characteristic, mirroring what the backend advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// One characteristic within a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProps,
}

/// One advertisement sighting as delivered by the radio backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: DeviceId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// Power/authorization state of the underlying radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    #[default]
    Unknown,
}

/// Why a scan session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStopReason {
    /// `stop()` was called.
    Stopped,
    /// The scan deadline elapsed.
    TimedOut,
    /// The radio reported an error mid-scan.
    Failed(String),
}

/// Notifications emitted by the session for observers (UI layers, logs).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    AdapterStateChanged(AdapterState),
    ScanStarted,
    DeviceDiscovered(DeviceRecord),
    /// An already-listed device was sighted again (RSSI refresh).
    DeviceUpdated(DeviceRecord),
    ScanStopped(ScanStopReason),
    Connecting(DeviceId),
    Connected(DeviceId),
    ConnectFailed { id: DeviceId, reason: String },
    Disconnected(DeviceId),
}

/// Human-readable name for a handful of Bluetooth SIG assigned services.
///
/// 16-bit UUIDs usually arrive expanded to the base-UUID form
/// `0000xxxx-0000-1000-8000-00805f9b34fb`.
pub fn service_display_name(uuid: &Uuid) -> &'static str {
    let s = uuid.to_string();
    let short = if s.starts_with("0000") && s.ends_with("-0000-1000-8000-00805f9b34fb") {
        s[4..8].to_string()
    } else {
        s
    };

    match short.as_str() {
        "1800" => "Generic Access",
        "1801" => "Generic Attribute",
        "180a" => "Device Information",
        "180f" => "Battery Service",
        "1805" => "Current Time Service",
        "180d" => "Heart Rate",
        "1818" => "Cycling Power",
        "1816" => "Cycling Speed and Cadence",
        _ => "Custom Service",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_display_name() {
        let battery = Uuid::parse_str("0000180f-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(service_display_name(&battery), "Battery Service");

        let custom = Uuid::parse_str("4f63756c-7573-2054-6872-65656d6f7465").unwrap();
        assert_eq!(service_display_name(&custom), "Custom Service");
    }

    #[test]
    fn test_device_display_name() {
        let record = DeviceRecord {
            id: DeviceId::from("aa:bb:cc:dd:ee:ff"),
            name: None,
            rssi: Some(-60),
            handle: None,
        };
        assert_eq!(record.display_name(), "Unknown Device");
    }
}
