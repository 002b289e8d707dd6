//! Error handling for gcodestream
//!
//! Provides error types for every layer of the streaming engine:
//! - Controller errors (usage, state, and device related)
//! - Connection errors (transport)
//! - Firmware errors (dialect and version specific)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Represents errors related to controller operation, including
/// streaming state violations, unresponsive devices, and flow control.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Controller is already connected
    #[error("Controller already connected")]
    AlreadyConnected,

    /// Controller has not finished its connection handshake
    #[error("Controller not ready: {reason}")]
    NotReady {
        /// Why the controller cannot accept commands yet.
        reason: String,
    },

    /// A stream is already running
    #[error("Already streaming")]
    AlreadyStreaming,

    /// Nothing was queued before streaming was requested
    #[error("There are no commands queued for streaming")]
    NothingQueued,

    /// Commands from an earlier send are still awaiting acknowledgment
    #[error("Cannot stream while there are {count} active commands")]
    ActiveCommands {
        /// Number of commands still awaiting acknowledgment.
        count: usize,
    },

    /// Controller operation timed out
    #[error("Controller operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Device did not answer status queries within the retry budget
    #[error("Controller unresponsive after {attempts} status queries")]
    Unresponsive {
        /// Number of status queries attempted.
        attempts: u32,
    },

    /// Command was rejected locally before being sent
    #[error("Command rejected: {reason}")]
    CommandRejected {
        /// The reason the command was rejected.
        reason: String,
    },

    /// A command can never fit in the firmware receive buffer
    #[error("Buffer overflow: {message}")]
    BufferOverflow {
        /// A message describing the buffer overflow.
        message: String,
    },

    /// Alarm condition blocks the operation
    #[error("Alarm: {message}")]
    Alarm {
        /// The alarm message.
        message: String,
    },

    /// Command lifecycle was driven out of order
    #[error("Invalid command transition: {reason}")]
    InvalidCommandState {
        /// Which lifecycle rule was broken.
        reason: String,
    },
}

/// Connection error type
///
/// Represents errors raised by the byte transport underneath the communicator.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Operation attempted on a closed connection
    #[error("Connection is not open")]
    NotOpen,

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Firmware error type
///
/// Represents errors specific to firmware dialects and protocol versions.
#[derive(Error, Debug, Clone)]
pub enum FirmwareError {
    /// Unsupported feature
    #[error("Feature not supported by {firmware}: {feature}")]
    UnsupportedFeature {
        /// The firmware that does not support the feature.
        firmware: String,
        /// The unsupported feature name.
        feature: String,
    },
}

/// Main error type for gcodestream
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Shorthand for an unsupported-feature error
    pub fn unsupported(firmware: impl Into<String>, feature: impl Into<String>) -> Self {
        Error::Firmware(FirmwareError::UnsupportedFeature {
            firmware: firmware.into(),
            feature: feature.into(),
        })
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
