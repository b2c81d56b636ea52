//! BLE central-role session manager.
//!
//! Discovers nearby peripherals in time-bounded scan sessions, drives
//! per-device connection lifecycles with cooperative cancellation, and keeps
//! a lazy, per-connection catalog of GATT services and characteristics.
//!
//! The radio itself sits behind the [`RadioAdapter`] trait; a
//! [`btleplug`-backed implementation](infrastructure::btleplug::BtleplugRadio)
//! is provided, and tests substitute scripted adapters.
//!
//! [`RadioAdapter`]: infrastructure::adapter::RadioAdapter

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{
    AdapterState, Advertisement, CharacteristicInfo, CharacteristicProps, ConnectionHandle,
    DeviceId, DeviceRecord, ScanStopReason, ServiceId, ServiceInfo, SessionEvent,
};
pub use domain::registry::{DeviceRegistry, Sighting};
pub use domain::settings::{LogSettings, SessionSettings, SettingsService};
pub use error::{AdapterError, SessionError};
pub use infrastructure::adapter::{AlwaysAllowed, PermissionGate, RadioAdapter, ScanEvent};
pub use infrastructure::bluetooth::connection::ConnectOutcome;
pub use infrastructure::bluetooth::{BleSession, SessionConfig};
pub use infrastructure::btleplug::BtleplugRadio;
