//! pixd — the pixgrid daemon.
//!
//! Assembles the gateway, the fleet controller and a local compute
//! provider whose instances are worker tasks in the same process.

pub mod local;
pub mod standalone;

pub use local::{LocalProvider, WorkerFactory};
pub use standalone::{Pipeline, run_standalone};
