//! pixgrid-core — types shared across the classification pipeline.
//!
//! ```text
//!  caller ──▶ Gateway ──put──▶ BlobStore(inputs)
//!               │  send Job                 ▲ get
//!               ▼                           │
//!           JobChannel ──receive──▶ Worker ─┴─ classify ──▶ BlobStore(outputs)
//!                                     │ send ClassificationResult
//!               ┌─────────────────────┘
//!               ▼
//!          ResultChannel ──receive (match by JobId)──▶ Gateway ──▶ caller
//! ```
//!
//! The fleet controller samples the job channel backlog and launches or
//! retires workers; it is the only owner of fleet state.

pub mod config;
pub mod error;
pub mod types;
pub mod wire;

pub use config::PixgridConfig;
pub use error::{CoreError, CoreResult};
pub use types::*;
