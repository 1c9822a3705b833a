//! pixgrid-channel — at-least-once message channels.
//!
//! Two channels connect the pipeline: `jobs` (gateway → workers) and
//! `results` (workers → gateways). Both follow the same contract:
//!
//! ```text
//! send ──▶ [visible] ──receive──▶ [hidden until visibility deadline]
//!              ▲                          │
//!              └──── deadline passes ─────┤
//!                                         └── delete(receipt) ──▶ gone
//! ```
//!
//! A delivery is acknowledged only by deleting it with the receipt of the
//! latest delivery. Anything not deleted is redelivered.

pub mod channel;
pub mod error;
pub mod store;

pub use channel::{Delivery, MessageChannel, Receipt, ReceiveOptions};
pub use error::{ChannelError, ChannelResult};
pub use store::{ChannelStore, RedbChannel};

/// Channel carrying jobs from gateways to workers.
pub const JOBS: &str = "jobs";
/// Channel carrying results from workers back to gateways.
pub const RESULTS: &str = "results";
