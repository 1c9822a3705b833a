//! pixgrid-worker — the job-processing side of the pipeline.
//!
//! ```text
//! JobChannel ──receive──▶ Worker ──get──▶ inputs
//!                           │
//!                           ├── Classifier (command | lookup)
//!                           ├──put──▶ outputs
//!                           ├──send─▶ ResultChannel
//!                           └──delete job (only after publishing)
//! ```

pub mod classifier;
pub mod error;
pub mod worker;

pub use classifier::{Classifier, CommandClassifier, LookupClassifier};
pub use error::{WorkerError, WorkerResult};
pub use worker::{Handled, Worker};
