//! OBD-II Error Types

use thiserror::Error;

/// Errors raised while building queries or parsing adapter output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The (mode, PID) pair has no catalog entry
    #[error("PID {pid:02X} not supported in mode {mode:02X}")]
    UnsupportedPid { mode: u8, pid: u8 },

    /// A response block could not be turned into a frame
    #[error("Malformed response: {0}")]
    MalformedFrame(String),

    /// A query string could not be interpreted
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Errors raised while converting payload bytes into result items
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload length does not satisfy the catalog entry
    #[error("Invalid response length: expected {expected}, got {actual}")]
    LengthMismatch { expected: String, actual: usize },

    /// Payload bytes are structurally wrong for the formula
    #[error("Invalid response data: {0}")]
    InvalidData(String),

    /// Decode was attempted before any payload was attached
    #[error("No response payload attached")]
    MissingPayload,
}
