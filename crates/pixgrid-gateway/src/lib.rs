//! pixgrid-gateway — accepts images and returns their classification.
//!
//! ```text
//!  POST / (inputFile) ──▶ Gateway::submit
//!                           ├── put image ──▶ inputs
//!                           ├── send Job ───▶ JobChannel
//!                           ├── fleet empty? ─▶ FleetHandle::request_check
//!                           └── await_result (bounded)
//!                                 ├── malformed ──────────▶ delete
//!                                 ├── foreign, expired ───▶ delete
//!                                 ├── foreign ────────────▶ leave unacked
//!                                 └── match ─▶ results bucket, delete, return
//! ```

pub mod error;
pub mod gateway;
pub mod http;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewaySettings};
pub use http::build_router;
