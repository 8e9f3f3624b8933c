//! Error types for pitmaster-core.
//!
//! Three layers of failure show up here:
//!
//! - [`TransportError`]: a network exchange with a controller failed. These
//!   surface on status streams and drive the reconnection engine.
//! - [`PairingError`]: a short-range pairing step failed. These are returned
//!   to the caller directly and never retried.
//! - [`Error`]: the orchestrator-level error, wrapping both of the above plus
//!   storage failures and argument validation.
//!
//! ## Recovery
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`TransportError::Timeout`] | Handled by the reconnection engine |
//! | [`TransportError::Network`] | Handled by the reconnection engine |
//! | [`TransportError::Http`] | Check the device firmware, usually not transient |
//! | [`TransportError::Decode`] | Device is not speaking the expected protocol |
//! | [`PairingError::NotFound`] | Move closer and scan again |
//! | [`PairingError::ConnectTimeout`] | Power-cycle the controller and retry pairing |
//! | [`Error::OutOfRange`] | Fix the argument |

use std::time::Duration;

use thiserror::Error;

use pitmaster_types::CodecError;

/// Failure of a single request to a controller over the local network.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection refused, DNS failure, reset, or similar.
    #[error("Network error: {0}")]
    Network(String),

    /// The controller answered with an unexpected HTTP status.
    #[error("Unexpected HTTP status {0}")]
    Http(u16),

    /// The controller answered, but the body was not a valid status document.
    #[error("Invalid response: {0}")]
    Decode(#[from] CodecError),

    /// The address could not be turned into a base URL.
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),
}

impl TransportError {
    /// Whether the controller could not be reached, as opposed to answering badly.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }
}

/// Failure during short-range discovery, connection or provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PairingError {
    /// Device was neither in the last scan nor found by a rediscovery scan.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Link establishment did not finish in time.
    #[error("Connection to {device_id} timed out after {timeout:?}")]
    ConnectTimeout {
        /// The device being connected.
        device_id: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// An operation that needs an open link was called without one.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// The confirmed credential write failed.
    #[error("Credential write failed: {0}")]
    WriteFailed(String),

    /// Adapter-level failure (no adapter, radio off, stack error).
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

impl PairingError {
    /// Create a not-found error for a device id.
    pub fn not_found(device_id: impl Into<String>) -> Self {
        Self::NotFound(device_id.into())
    }

    /// Create a connect-timeout error.
    pub fn connect_timeout(device_id: impl Into<String>, timeout: Duration) -> Self {
        Self::ConnectTimeout {
            device_id: device_id.into(),
            timeout,
        }
    }
}

impl From<btleplug::Error> for PairingError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::DeviceNotFound => Self::NotFound("peripheral".to_string()),
            btleplug::Error::NotConnected => Self::NotConnected("peripheral".to_string()),
            other => Self::Bluetooth(other.to_string()),
        }
    }
}

/// Errors returned by the orchestrator, poller and session binder.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A request to the controller failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A pairing step failed.
    #[error(transparent)]
    Pairing(#[from] PairingError),

    /// Persistent storage failed.
    #[error("Storage error: {0}")]
    Store(#[from] pitmaster_store::Error),

    /// A control argument was outside its accepted range.
    #[error("{field} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        /// Name of the argument.
        field: &'static str,
        /// The rejected value.
        value: f64,
        /// Lowest accepted value.
        min: f64,
        /// Highest accepted value.
        max: f64,
    },

    /// No persisted record for this device.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device has no network address bound yet.
    #[error("Device {0} has no network address; bind one first")]
    NoAddress(String),

    /// A session belongs to a different device than the one it was bound to.
    #[error("Session {session_id} belongs to {owner}, not {device_id}")]
    SessionMismatch {
        /// The session being registered.
        session_id: String,
        /// Device recorded on the session.
        owner: String,
        /// Device the caller tried to bind it to.
        device_id: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background worker panicked or was aborted.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a device not found error.
    pub fn device_not_found(device_id: impl Into<String>) -> Self {
        Self::DeviceNotFound(device_id.into())
    }

    /// Map a codec range failure onto the control-argument error.
    pub(crate) fn from_codec_range(err: CodecError) -> Self {
        match err {
            CodecError::OutOfRange {
                field,
                value,
                min,
                max,
            } => Self::OutOfRange {
                field,
                value,
                min,
                max,
            },
            other => Self::Transport(TransportError::Decode(other)),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}

/// Result type alias using pitmaster-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type alias for pairing operations.
pub type PairingResult<T> = std::result::Result<T, PairingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Timeout.to_string(), "Request timed out");
        assert_eq!(
            TransportError::Http(503).to_string(),
            "Unexpected HTTP status 503"
        );
        let err = TransportError::Network("connection refused".into());
        assert!(err.to_string().contains("connection refused"));

        let err = TransportError::from(CodecError::MissingField("grill_temp"));
        assert!(err.to_string().contains("grill_temp"));
    }

    #[test]
    fn test_transport_error_connectivity() {
        assert!(TransportError::Timeout.is_connectivity());
        assert!(TransportError::Network("reset".into()).is_connectivity());
        assert!(!TransportError::Http(500).is_connectivity());
        assert!(!TransportError::Decode(CodecError::Malformed("x".into())).is_connectivity());
    }

    #[test]
    fn test_pairing_error_display() {
        let err = PairingError::not_found("AA:BB:CC:DD:EE:FF");
        assert_eq!(err.to_string(), "Device not found: AA:BB:CC:DD:EE:FF");

        let err = PairingError::connect_timeout("grill-1", Duration::from_secs(15));
        assert!(err.to_string().contains("grill-1"));
        assert!(err.to_string().contains("15s"));

        let err = PairingError::NotConnected("grill-1".into());
        assert_eq!(err.to_string(), "Not connected to grill-1");
    }

    #[test]
    fn test_out_of_range_from_codec() {
        let err = Error::from_codec_range(CodecError::out_of_range("fan_speed", 120.0, 0.0, 100.0));
        match err {
            Error::OutOfRange { field, value, .. } => {
                assert_eq!(field, "fan_speed");
                assert_eq!(value, 120.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_wraps_layers() {
        let err: Error = TransportError::Http(404).into();
        assert_eq!(err.to_string(), "Unexpected HTTP status 404");

        let err: Error = PairingError::WriteFailed("gatt".into()).into();
        assert!(matches!(err, Error::Pairing(PairingError::WriteFailed(_))));

        let err: Error = pitmaster_store::Error::session_not_found("s1").into();
        assert!(err.to_string().starts_with("Storage error"));
    }

    #[test]
    fn test_session_mismatch_display() {
        let err = Error::SessionMismatch {
            session_id: "s1".into(),
            owner: "grill-a".into(),
            device_id: "grill-b".into(),
        };
        assert_eq!(err.to_string(), "Session s1 belongs to grill-a, not grill-b");
    }
}
