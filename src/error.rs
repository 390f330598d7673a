//! Error types and handling for chargesync
//!
//! Errors are tagged by kind so the control loop can decide by pattern
//! matching whether a failure ends the process or only the current iteration.

use std::fmt;
use thiserror::Error;

/// Result type alias for chargesync operations
pub type Result<T> = std::result::Result<T, ChargeSyncError>;

/// How a transport call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The socket is gone (closed, reset, timed out); reconnect before retrying
    ConnectionLost,
    /// The socket answered but the frame was malformed, short or rejected
    Frame,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::ConnectionLost => write!(f, "connection lost"),
            TransportErrorKind::Frame => write!(f, "frame error"),
        }
    }
}

/// Main error type for chargesync
#[derive(Debug, Error)]
pub enum ChargeSyncError {
    /// Missing or invalid settings detected at startup
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A single setting failed validation
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Initial probe of the inverter or charger failed
    #[error("Connectivity error: {message}")]
    Connectivity { message: String },

    /// Telemetry or device transport failure
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// Charger status could not be fetched or decoded
    #[error("Device status unavailable: {message}")]
    DeviceStatus { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

}

impl ChargeSyncError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        ChargeSyncError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        ChargeSyncError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new connectivity error
    pub fn connectivity<S: Into<String>>(message: S) -> Self {
        ChargeSyncError::Connectivity {
            message: message.into(),
        }
    }

    /// Create a transport error signalling a dropped socket
    pub fn connection_lost<S: Into<String>>(message: S) -> Self {
        ChargeSyncError::Transport {
            kind: TransportErrorKind::ConnectionLost,
            message: message.into(),
        }
    }

    /// Create a transport error signalling a bad or short response frame
    pub fn frame<S: Into<String>>(message: S) -> Self {
        ChargeSyncError::Transport {
            kind: TransportErrorKind::Frame,
            message: message.into(),
        }
    }

    /// Create a new device status error
    pub fn device_status<S: Into<String>>(message: S) -> Self {
        ChargeSyncError::DeviceStatus {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        ChargeSyncError::Io {
            message: message.into(),
        }
    }

    /// Whether this error must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChargeSyncError::Config { .. }
                | ChargeSyncError::Validation { .. }
                | ChargeSyncError::Connectivity { .. }
        )
    }

    /// Whether a retry of the same transport call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ChargeSyncError::Transport { .. })
    }

    /// Whether the underlying socket has to be recreated before retrying
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ChargeSyncError::Transport {
                kind: TransportErrorKind::ConnectionLost,
                ..
            }
        )
    }
}

impl From<std::io::Error> for ChargeSyncError {
    fn from(err: std::io::Error) -> Self {
        ChargeSyncError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for ChargeSyncError {
    fn from(err: serde_yaml::Error) -> Self {
        ChargeSyncError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ChargeSyncError {
    fn from(err: serde_json::Error) -> Self {
        ChargeSyncError::Serialization {
            message: err.to_string(),
        }
    }
}
