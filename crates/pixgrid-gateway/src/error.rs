//! Error types for the gateway.

use std::time::Duration;

use pixgrid_core::JobId;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No matching result within the request timeout or round cap.
    #[error("timed out after {waited:?} ({rounds} rounds) waiting for {job_id}")]
    Timeout {
        job_id: JobId,
        waited: Duration,
        rounds: u32,
    },

    #[error(transparent)]
    Core(#[from] pixgrid_core::CoreError),

    #[error(transparent)]
    Blob(#[from] pixgrid_blob::BlobError),

    #[error(transparent)]
    Channel(#[from] pixgrid_channel::ChannelError),
}
