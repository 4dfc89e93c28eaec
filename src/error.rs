//! Error types for electronic load operations.

use thiserror::Error;

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Error types for electronic load communication and discharge tests.
#[derive(Error, Debug)]
pub enum LoadError {
    /// General I/O error (socket bind, send, receive)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single RPC attempt did not collect its replies in time
    #[error("Timeout waiting for {expected} response(s) to {request:?}, got {received}")]
    Timeout {
        /// Request that was sent
        request: String,
        /// Number of replies awaited
        expected: usize,
        /// Number of replies that arrived
        received: usize,
    },

    /// Every retry of an RPC timed out; the instrument link is considered gone
    #[error("Instrument link lost: {request:?} unanswered after {attempts} attempts")]
    LinkLost {
        /// Request that was sent
        request: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// A set command was not echoed back by its follow-up query
    #[error("Verification failed: expected {expected}, got {actual}")]
    VerificationFailed {
        /// Value that was commanded
        expected: String,
        /// Value the instrument reported
        actual: String,
    },

    /// Response didn't match expected format
    #[error("Invalid response: expected {expected}, got {actual}")]
    InvalidResponse {
        /// Expected response format
        expected: String,
        /// Actual response received
        actual: String,
    },

    /// Reply parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// `rpc()` called before the receive loop was started
    #[error("Channel not started")]
    ChannelNotStarted,
}
