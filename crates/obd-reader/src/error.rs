//! Reader Error Types

use elm327_driver::DriverError;
use obd_protocol::ProtocolError;
use thiserror::Error;

/// Errors returned by typed OBD-II reads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReaderError {
    /// The query failed in the driver (timeout, transport)
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The query could not be built
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The vehicle answered but the payload did not decode
    #[error("Response could not be decoded: {0}")]
    Decode(String),

    /// A decoded response lacked the expected value
    #[error("Response has no usable {0}")]
    UnexpectedValue(&'static str),
}
