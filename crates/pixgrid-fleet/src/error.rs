//! Error types for the fleet controller.

use thiserror::Error;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("fleet at capacity: {max} instances")]
    CapacityExceeded { max: u32 },

    #[error("compute provider error: {0}")]
    Provider(String),

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("no live workers to retire")]
    NoWorkers,

    #[error("backlog unavailable: {0}")]
    Backlog(#[from] pixgrid_channel::ChannelError),
}
