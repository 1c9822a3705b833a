//! pixgrid-fleet — backlog-driven elastic worker fleet.
//!
//! The controller samples the job channel's approximate length on a fixed
//! period (and on demand) and applies at most one scaling action per tick:
//!
//! ```text
//!  ┌────────────┐ approximate_length ┌──────────────┐ launch/terminate ┌──────────┐
//!  │ JobChannel │ ─────────────────▶ │ FleetControl │ ───────────────▶ │ Provider │
//!  └────────────┘                    └──────┬───────┘                  └──────────┘
//!                                           │ watch<FleetStatus>
//!                                           ▼
//!                                    FleetHandle (gateway, /healthz)
//! ```
//!
//! See [`policy`] for the decision rules. Launch and retire update the live
//! count before calling the provider and roll it back on failure.

pub mod controller;
pub mod error;
pub mod policy;
pub mod provider;

pub use controller::{FleetController, FleetHandle, FleetState, FleetStatus};
pub use error::{FleetError, FleetResult};
pub use policy::{LaunchReason, ScaleDecision, ScalingPolicy, decide};
pub use provider::{ComputeProvider, LaunchRequest};
