//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Control frame payload is not valid JSON.
    #[error("invalid control JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Control message is missing its `type` discriminator.
    #[error("control message missing `type` field")]
    MissingType,

    /// A required field is missing or has the wrong type.
    #[error("control message field `{0}` missing or invalid")]
    InvalidField(&'static str),

    /// Resize dimensions must both be non-zero.
    #[error("resize dimensions must be non-zero, got {cols}x{rows}")]
    ZeroDimensions {
        /// Requested columns.
        cols: u16,
        /// Requested rows.
        rows: u16,
    },
}

/// Convenience result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
