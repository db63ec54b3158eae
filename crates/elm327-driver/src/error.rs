//! Driver Error Types

use obd_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the adapter driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Query could not be built
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Writing to the adapter failed; the transport is dead
    #[error("Transport write failed: {0}")]
    TransportWrite(String),

    /// Reading from the adapter failed or reached end of stream
    #[error("Transport read failed: {0}")]
    TransportRead(String),

    /// No response within the watchdog interval
    #[error("Timeout waiting for {mode:02X}{pid:02X} response after {after_ms}ms")]
    Timeout { mode: u8, pid: u8, after_ms: u64 },

    /// The driver was shut down or its transport already failed
    #[error("OBD adapter connection closed")]
    TransportClosed,

    /// Opening the transport failed
    #[error("Failed to open adapter: {0}")]
    Io(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for DriverError {
    fn from(err: tokio_serial::Error) -> Self {
        DriverError::Io(err.to_string())
    }
}
