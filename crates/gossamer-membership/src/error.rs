//! Error types for gossamer-membership.

use thiserror::Error;

/// Result type for membership operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the membership engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A wire frame could not be encoded or decoded.
    #[error("malformed wire frame: {0}")]
    Wire(#[from] serde_json::Error),

    /// An operation was handed a message of the wrong kind.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),

    /// A handshake completion referenced a counter with no pending link.
    #[error("no pending handshake for counter {0}")]
    UnknownHandshake(u64),
}
