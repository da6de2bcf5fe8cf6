//! Error types for setu-link

use crate::protocol::ResponseCode;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// setu-link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (socket creation, send, receive)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device returned a non-success response code
    #[error("{operation} address={address:#x} response_code={code:?} ({})", code.description())]
    Response {
        /// Operation that failed ("read_uint32", "write_uint32")
        operation: &'static str,
        /// Register address of the failed transaction
        address: u32,
        /// Response code reported by the device
        code: ResponseCode,
    },

    /// Retry budget exhausted without a matching reply
    #[error("Timeout: {operation} address={address:#x}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Register address involved
        address: u32,
    },

    /// Session is not started (no open control socket)
    #[error("Device session not started")]
    NotStarted,

    /// Invalid parameter (misaligned address, oversized payload, bad pin)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Malformed or short reply buffer
    #[error("Buffer underflow: {0}")]
    BufferUnderflow(&'static str),

    /// Consistency assertion failed (echoed address mismatch, unexpected
    /// busy bit). Not retried.
    #[error("Consistency fault: {0}")]
    Consistency(String),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file serialize error
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Device enumeration failed after reset
    #[error("Enumeration failed: {0}")]
    Enumeration(String),

    /// Operation not supported on this hardware
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
