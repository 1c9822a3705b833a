//! FleetController — owns the fleet and runs the scaling loop.
//!
//! The controller is the only writer of [`FleetState`]. Everyone else
//! holds a [`FleetHandle`]: a `watch` view of the latest [`FleetStatus`]
//! plus a coalescing "check now" signal that triggers an out-of-band tick.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pixgrid_channel::MessageChannel;
use pixgrid_core::{WorkerHandle, epoch_ms};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};
use crate::policy::{ScaleDecision, ScalingPolicy, decide};
use crate::provider::{ComputeProvider, LaunchRequest};

// ── State ──────────────────────────────────────────────────────

/// Live workers and the count the scaling rules run against.
///
/// `live_count` moves before the provider call completes (up on launch,
/// down on retire) and is rolled back if the call fails, so it may briefly
/// differ from `workers.len()` while a call is in flight.
#[derive(Debug, Default)]
pub struct FleetState {
    live_count: u32,
    workers: Vec<WorkerHandle>,
    next_seq: u64,
}

impl FleetState {
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// The worker launched first; ties broken by launch sequence.
    pub fn oldest(&self) -> Option<&WorkerHandle> {
        self.workers.iter().min_by_key(|w| w.age_key())
    }
}

/// Read-only snapshot published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetStatus {
    pub live_workers: u32,
    pub worker_ids: Vec<String>,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Backlog seen by the most recent tick.
    pub last_backlog: Option<u64>,
}

// ── Handle ─────────────────────────────────────────────────────

/// Cloneable read-only view of the fleet.
#[derive(Clone)]
pub struct FleetHandle {
    status: watch::Receiver<FleetStatus>,
    check: mpsc::Sender<()>,
}

impl FleetHandle {
    pub fn status(&self) -> FleetStatus {
        self.status.borrow().clone()
    }

    pub fn live_count(&self) -> u32 {
        self.status.borrow().live_workers
    }

    /// Ask the controller to evaluate now instead of at the next tick.
    /// Requests made while one is already pending are merged. Returns
    /// false if the controller has stopped.
    pub fn request_check(&self) -> bool {
        match self.check.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Wait until the published status satisfies `pred`.
    pub async fn wait_for(&mut self, pred: impl FnMut(&FleetStatus) -> bool) -> bool {
        self.status.wait_for(pred).await.is_ok()
    }
}

// ── Controller ─────────────────────────────────────────────────

pub struct FleetController {
    policy: ScalingPolicy,
    image_id: String,
    provider: Arc<dyn ComputeProvider>,
    jobs: Arc<dyn MessageChannel>,
    state: FleetState,
    last_backlog: Option<u64>,
    status_tx: watch::Sender<FleetStatus>,
    check_tx: mpsc::Sender<()>,
    check_rx: mpsc::Receiver<()>,
}

impl FleetController {
    /// Create a controller with an empty fleet. `jobs` is the channel
    /// whose backlog drives scaling.
    pub fn new(
        policy: ScalingPolicy,
        image_id: impl Into<String>,
        provider: Arc<dyn ComputeProvider>,
        jobs: Arc<dyn MessageChannel>,
    ) -> Self {
        let (check_tx, check_rx) = mpsc::channel(1);
        let (status_tx, _) = watch::channel(FleetStatus {
            min_instances: policy.min_instances,
            max_instances: policy.max_instances,
            ..FleetStatus::default()
        });
        Self {
            policy,
            image_id: image_id.into(),
            provider,
            jobs,
            state: FleetState::default(),
            last_backlog: None,
            status_tx,
            check_tx,
            check_rx,
        }
    }

    pub fn handle(&self) -> FleetHandle {
        FleetHandle {
            status: self.status_tx.subscribe(),
            check: self.check_tx.clone(),
        }
    }

    pub fn state(&self) -> &FleetState {
        &self.state
    }

    fn publish(&self) {
        self.status_tx.send_replace(FleetStatus {
            live_workers: self.state.live_count,
            worker_ids: self.state.workers.iter().map(|w| w.id.clone()).collect(),
            min_instances: self.policy.min_instances,
            max_instances: self.policy.max_instances,
            last_backlog: self.last_backlog,
        });
    }

    /// Launch one worker.
    ///
    /// Fails with [`FleetError::CapacityExceeded`] at `max_instances`. On
    /// provider failure the live count is restored to its prior value.
    pub async fn launch(&mut self) -> FleetResult<WorkerHandle> {
        if self.state.live_count >= self.policy.max_instances {
            return Err(FleetError::CapacityExceeded {
                max: self.policy.max_instances,
            });
        }

        self.state.live_count += 1;
        self.publish();

        let name = format!("worker-{}", Uuid::new_v4().simple());
        let request = LaunchRequest {
            image_id: self.image_id.clone(),
            tags: BTreeMap::from([("Name".to_string(), name.clone())]),
        };

        match self.provider.launch(request).await {
            Ok(instance_id) => {
                let seq = self.state.next_seq;
                self.state.next_seq += 1;
                let handle = WorkerHandle {
                    id: name,
                    instance_id,
                    launched_at_ms: epoch_ms(),
                    seq,
                };
                self.state.workers.push(handle.clone());
                self.publish();
                info!(
                    worker = %handle.id,
                    instance = %handle.instance_id,
                    live = self.state.live_count,
                    "worker launched"
                );
                Ok(handle)
            }
            Err(e) => {
                self.state.live_count -= 1;
                self.publish();
                warn!(%name, error = %e, live = self.state.live_count, "launch failed, rolled back");
                Err(FleetError::Provider(e.to_string()))
            }
        }
    }

    /// Retire the worker with the given id.
    ///
    /// On provider failure the live count is restored and the worker kept.
    pub async fn retire(&mut self, worker_id: &str) -> FleetResult<()> {
        let index = self
            .state
            .workers
            .iter()
            .position(|w| w.id == worker_id)
            .ok_or_else(|| FleetError::UnknownWorker(worker_id.to_string()))?;
        let instance_id = self.state.workers[index].instance_id.clone();

        self.state.live_count = self.state.live_count.saturating_sub(1);
        self.publish();

        match self.provider.terminate(&instance_id).await {
            Ok(()) => {
                self.state.workers.retain(|w| w.id != worker_id);
                self.publish();
                info!(
                    worker = %worker_id,
                    instance = %instance_id,
                    live = self.state.live_count,
                    "worker retired"
                );
                Ok(())
            }
            Err(e) => {
                self.state.live_count += 1;
                self.publish();
                warn!(worker = %worker_id, error = %e, "terminate failed, rolled back");
                Err(FleetError::Provider(e.to_string()))
            }
        }
    }

    /// Retire the oldest live worker.
    pub async fn retire_oldest(&mut self) -> FleetResult<String> {
        let id = self
            .state
            .oldest()
            .map(|w| w.id.clone())
            .ok_or(FleetError::NoWorkers)?;
        self.retire(&id).await?;
        Ok(id)
    }

    /// Sample the backlog and apply at most one scaling action.
    ///
    /// Action failures are logged and do not fail the tick; only an
    /// unreadable backlog does.
    pub async fn tick(&mut self) -> FleetResult<ScaleDecision> {
        let backlog = self.jobs.approximate_length().await?;
        self.last_backlog = Some(backlog);

        let live = self.state.live_count;
        let decision = decide(live, backlog, &self.policy);
        debug!(live, backlog, ?decision, "fleet evaluated");

        match decision {
            ScaleDecision::Launch(reason) => {
                if let Err(e) = self.launch().await {
                    warn!(?reason, error = %e, "scale-out skipped");
                }
            }
            ScaleDecision::Retire => {
                if let Err(e) = self.retire_oldest().await {
                    warn!(error = %e, "scale-in skipped");
                }
            }
            ScaleDecision::NoChange => {}
        }
        self.publish();

        Ok(decision)
    }

    /// Run the control loop: tick every `interval` and whenever a handle
    /// requests a check, until `shutdown` fires.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            min = self.policy.min_instances,
            max = self.policy.max_instances,
            "fleet controller started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "fleet tick skipped");
                    }
                }
                Some(()) = self.check_rx.recv() => {
                    debug!("on-demand fleet check");
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "fleet tick skipped");
                    }
                }
                _ = shutdown.changed() => {
                    info!(live = self.state.live_count, "fleet controller shutting down");
                    break;
                }
            }
        }
    }
}
