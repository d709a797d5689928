//! Error types for gossamer-link.

use thiserror::Error;

/// Result type for link operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a link can report to its owner.
#[derive(Debug, Error)]
pub enum Error {
    /// The link (or its remote half) has been torn down.
    #[error("link is closed")]
    Closed,

    /// A signaling fragment could not be applied to the handshake.
    #[error("signaling failed: {0}")]
    Signaling(String),
}
