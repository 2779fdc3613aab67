//! Error types for roster
//!
//! We use `thiserror` for structured error types that can be matched on,
//! and `anyhow` for error propagation in application code.

use thiserror::Error;

/// Central error type for roster operations
#[derive(Error, Debug)]
pub enum RosterError {
    // === Protocol Errors ===
    #[error("invalid payload length: {0}")]
    InvalidLength(i32),

    #[error("short payload: expected {expected} bytes, copied {copied}")]
    ShortPayload { expected: u64, copied: u64 },

    // === Transport Errors ===
    #[error("write timed out")]
    WriteTimeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using RosterError
pub type Result<T> = std::result::Result<T, RosterError>;

impl From<rustls::Error> for RosterError {
    fn from(err: rustls::Error) -> Self {
        RosterError::Tls(err.to_string())
    }
}
