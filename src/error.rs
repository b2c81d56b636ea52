//! Session error taxonomy.

use crate::domain::models::{AdapterState, DeviceId};
use thiserror::Error;
use uuid::Uuid;

/// Error reported by a radio backend. Opaque to the session core: no variant
/// is ever pattern-matched to infer intent (cancellation is tracked by the
/// lifecycle manager itself).
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("radio backend error: {0}")]
    Backend(String),

    #[error("peripheral {0} is not known to the radio backend")]
    DeviceNotFound(DeviceId),

    #[error("stale or unknown connection handle")]
    InvalidHandle,
}

/// Everything that can go wrong at the session manager's public surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bluetooth adapter is not ready (state: {0:?})")]
    AdapterNotReady(AdapterState),

    #[error("bluetooth permission denied")]
    PermissionDenied,

    #[error("device {0} is already connected")]
    AlreadyConnected(DeviceId),

    #[error("a connection attempt for device {0} is already in flight")]
    AttemptInProgress(DeviceId),

    #[error("failed to connect to device {id}")]
    ConnectFailed {
        id: DeviceId,
        #[source]
        source: AdapterError,
    },

    #[error("device {0} is not connected")]
    NotConnected(DeviceId),

    #[error("service {service} is unknown on device {id}")]
    UnknownService { id: DeviceId, service: Uuid },

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
