//! Error types surfaced by the core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors reported to the shell. None of them is fatal to the process;
/// every one is also emitted as a `CoreEvent::Failure`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Bluetooth permission denied: {0}")]
    PermissionDenied(String),
    #[error("No saved device to reconnect to")]
    NoSavedDevice,
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("Not connected to a device")]
    NotConnected,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("Scan failed: {0}")]
    ScanFailed(String),
}

/// Errors raised by the transport seams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("bluetooth unavailable: {0}")]
    Unavailable(String),
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("link not ready: {0}")]
    NotReady(String),
    #[error("{0}")]
    Backend(String),
}

impl TransportError {
    /// Maps a failed `open` into the error the shell sees.
    pub fn into_connect_error(self, address: &str) -> CoreError {
        match self {
            Self::PermissionDenied(reason) => CoreError::PermissionDenied(reason),
            other => CoreError::ConnectFailed {
                address: address.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Maps a failed discovery start into the error the shell sees.
    pub fn into_scan_error(self) -> CoreError {
        match self {
            Self::PermissionDenied(reason) => CoreError::PermissionDenied(reason),
            other => CoreError::ScanFailed(other.to_string()),
        }
    }
}

impl From<bluest::Error> for TransportError {
    fn from(e: bluest::Error) -> Self {
        use bluest::error::ErrorKind;
        match e.kind() {
            ErrorKind::NotAuthorized => Self::PermissionDenied(e.to_string()),
            ErrorKind::AdapterUnavailable => Self::Unavailable(e.to_string()),
            ErrorKind::NotFound => Self::DeviceNotFound(e.to_string()),
            ErrorKind::NotReady | ErrorKind::NotConnected => Self::NotReady(e.to_string()),
            _ => Self::Backend(e.to_string()),
        }
    }
}

/// Errors raised by key/value stores. `LastDeviceStore` masks them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_survives_mapping() {
        let err = TransportError::PermissionDenied("BLUETOOTH_CONNECT".into());
        assert_eq!(
            err.clone().into_connect_error("AA:BB"),
            CoreError::PermissionDenied("BLUETOOTH_CONNECT".into())
        );
        assert_eq!(
            err.into_scan_error(),
            CoreError::PermissionDenied("BLUETOOTH_CONNECT".into())
        );
    }

    #[test]
    fn other_open_failures_become_connect_failed() {
        let err = TransportError::DeviceNotFound("AA:BB".into()).into_connect_error("AA:BB");
        assert_eq!(
            err,
            CoreError::ConnectFailed {
                address: "AA:BB".into(),
                reason: "device AA:BB not found".into(),
            }
        );
    }
}
