//! Error types for the worker.

use thiserror::Error;

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Core(#[from] pixgrid_core::CoreError),

    #[error(transparent)]
    Blob(#[from] pixgrid_blob::BlobError),

    #[error(transparent)]
    Channel(#[from] pixgrid_channel::ChannelError),

    #[error("classifier failed: {0}")]
    Classifier(String),

    #[error("classifier timed out after {0:?}")]
    ClassifierTimeout(std::time::Duration),

    #[error("dataset error at line {line}: {message}")]
    Dataset { line: usize, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
