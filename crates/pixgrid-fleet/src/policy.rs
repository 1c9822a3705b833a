//! Scaling policy — the pure decision rule.
//!
//! Rules, first match wins:
//!
//! ```text
//! 1. live == 0 and backlog > 0                        → Launch(ColdStart)
//! 2. backlog / live ≥ scale_out and live < max        → Launch(Backlog)
//! 3. backlog ≤ scale_in and live > min                → Retire
//! 4. live < min                                       → Launch(BelowMinimum)
//! ```
//!
//! At most one action per evaluation.

use pixgrid_core::config::FleetConfig;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingPolicy {
    pub min_instances: u32,
    pub max_instances: u32,
    pub scale_out_threshold: f64,
    pub scale_in_threshold: f64,
}

impl From<&FleetConfig> for ScalingPolicy {
    fn from(config: &FleetConfig) -> Self {
        Self {
            min_instances: config.min_instances,
            max_instances: config.max_instances,
            scale_out_threshold: config.scale_out_threshold,
            scale_in_threshold: config.scale_in_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchReason {
    ColdStart,
    Backlog,
    BelowMinimum,
}

/// What one evaluation of the control loop decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Launch(LaunchReason),
    /// Retire the oldest live worker.
    Retire,
    NoChange,
}

/// Decide the single scaling action for the given fleet size and backlog.
pub fn decide(live: u32, backlog: u64, policy: &ScalingPolicy) -> ScaleDecision {
    let below_max = live < policy.max_instances;

    if live == 0 {
        if backlog > 0 && below_max {
            return ScaleDecision::Launch(LaunchReason::ColdStart);
        }
    } else if below_max && backlog as f64 / live as f64 >= policy.scale_out_threshold {
        return ScaleDecision::Launch(LaunchReason::Backlog);
    }

    if backlog as f64 <= policy.scale_in_threshold && live > policy.min_instances {
        return ScaleDecision::Retire;
    }

    if live < policy.min_instances && below_max {
        return ScaleDecision::Launch(LaunchReason::BelowMinimum);
    }

    ScaleDecision::NoChange
}
