//! Shared error types for the spooltag system.

use thiserror::Error;

/// Top-level error type for the spooltag system.
#[derive(Error, Debug)]
pub enum SpooltagError {
    /// Invalid caller input (malformed uid, bad hex, empty key material).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A tag image or dump did not have the expected shape.
    #[error("Malformed tag image: {0}")]
    MalformedImage(String),

    /// A field value cannot be represented in its fixed-width tag slot.
    #[error("Field out of range: {field}: {reason}")]
    FieldOutOfRange {
        /// The record field that failed to encode.
        field: &'static str,
        /// Why it does not fit.
        reason: String,
    },

    /// Sector authentication failed against every candidate key.
    ///
    /// Non-fatal: reads degrade to a zero-filled sector, writes skip the
    /// sector. Surfaced only in aggregate (sector mask / short write count).
    #[error("Authentication failed for sector {0}")]
    AuthenticationFailed(u8),

    /// No hardware agent is connected to the bridge.
    #[error("No bridge agent connected")]
    NoBridgeConnected,

    /// Another tag operation is already awaiting a tag touch.
    #[error("A tag request is already in progress")]
    RequestInProgress,

    /// The request deadline elapsed before the agent replied.
    #[error("Tag operation timed out")]
    Timeout,

    /// The agent sent something the protocol does not allow here.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The agent hardware cannot perform the requested operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The agent reported a failure for the current request.
    #[error("Agent error: {0}")]
    Agent(String),

    /// A transport-level send or connect failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with SpooltagError.
pub type SpooltagResult<T> = Result<T, SpooltagError>;
