//! Error types for the device core

use thiserror::Error;

use crate::session::SessionId;

/// Errors surfaced by the device.
///
/// Commands issued in the wrong state are not errors; they are ignored by the device.
/// Only range errors and infrastructure failures are reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Upload requested for a history slot that does not exist
    #[error("Session index {index} is out of range (history holds {len} sessions)")]
    InvalidSessionIndex { index: usize, len: usize },
    /// Attempt to log a session that has not been closed
    #[error("Session {id} is still open")]
    SessionStillOpen { id: SessionId },
    /// Attempt to log a session twice
    #[error("Session {id} is already in the history")]
    DuplicateSession { id: SessionId },
    /// The upload sink rejected the transfer
    #[error("Upload failed: {0}")]
    UploadFailed(String),
    /// The device command loop is no longer running
    #[error("Device is not running")]
    DeviceUnavailable,
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Serialization(err.to_string())
    }
}
