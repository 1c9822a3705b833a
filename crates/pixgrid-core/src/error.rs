//! Error types for pixgrid core types and the wire codec.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}
