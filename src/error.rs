//! # Error Types
//!
//! Custom error types for Teleop Bridge using `thiserror`.
//!
//! Device, transport and protocol errors are logged where they happen and
//! never cross the polling loop. Configuration errors are returned to the
//! caller of the public operations as a rejected request.

use thiserror::Error;

/// Main error type for Teleop Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Input device enumeration or poll failure
    #[error("Device error: {0}")]
    Device(String),

    /// Polled a device the backend no longer knows about
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// UDP socket could not be set up
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed wire packet or discovery message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed JSON robot descriptor
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Operation named a controller that is not attached
    #[error("Unknown controller: {0}")]
    UnknownController(String),

    /// Operation named a robot that is not registered
    #[error("Unknown robot: {0}")]
    UnknownRobot(String),

    /// Robot address could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operation not allowed in the current state
    #[error("Rejected: {0}")]
    Rejected(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Teleop Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BridgeError::UnknownController("pad_1".to_string());
        assert_eq!(err.to_string(), "Unknown controller: pad_1");

        let err = BridgeError::Rejected("emergency stop active".to_string());
        assert_eq!(err.to_string(), "Rejected: emergency stop active");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
