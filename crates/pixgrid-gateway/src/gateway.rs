//! Gateway — submits jobs and waits for the matching result.
//!
//! Every gateway shares one result channel, so a receive may hand back
//! another caller's result. Those are left unacknowledged and reappear for
//! their owner once the visibility timeout lapses. Only the matching result
//! is persisted and deleted.
//!
//! The wait is bounded twice: by `request_timeout` in wall time and by
//! `max_rounds` receives. When either runs out the caller gets
//! [`GatewayError::Timeout`]. The job and any late result carry the same
//! expiry, so a worker that picks up the job afterwards drops it, and a
//! gateway that sees the stray result afterwards deletes it.

use std::sync::Arc;
use std::time::Duration;

use pixgrid_blob::Buckets;
use pixgrid_channel::{MessageChannel, Receipt, ReceiveOptions};
use pixgrid_core::config::GatewayConfig;
use pixgrid_core::{ClassificationResult, Job, JobId, epoch_ms, file_stem, wire};
use pixgrid_fleet::{FleetHandle, FleetStatus};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{GatewayError, GatewayResult};

/// Correlation bounds for one request.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub request_timeout: Duration,
    pub receive_wait: Duration,
    pub result_visibility_timeout: Duration,
    pub max_rounds: u32,
    pub max_messages: usize,
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            receive_wait: config.receive_wait,
            result_visibility_timeout: config.result_visibility_timeout,
            max_rounds: config.max_rounds.max(1),
            max_messages: config.max_messages.max(1),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            receive_wait: Duration::from_secs(20),
            result_visibility_timeout: Duration::from_secs(5),
            max_rounds: 64,
            max_messages: 1,
        }
    }
}

pub struct Gateway {
    jobs: Arc<dyn MessageChannel>,
    results: Arc<dyn MessageChannel>,
    buckets: Buckets,
    fleet: Option<FleetHandle>,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        jobs: Arc<dyn MessageChannel>,
        results: Arc<dyn MessageChannel>,
        buckets: Buckets,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            jobs,
            results,
            buckets,
            fleet: None,
            settings,
        }
    }

    /// Attach the fleet so an empty fleet can be woken on submit.
    pub fn with_fleet(mut self, fleet: FleetHandle) -> Self {
        self.fleet = Some(fleet);
        self
    }

    pub fn fleet_status(&self) -> Option<FleetStatus> {
        self.fleet.as_ref().map(FleetHandle::status)
    }

    /// Store the image, enqueue a job for it and wait for its result.
    pub async fn submit(&self, image: &[u8], filename: &str) -> GatewayResult<ClassificationResult> {
        let name = file_stem(filename).map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        if image.is_empty() {
            return Err(GatewayError::BadRequest(format!("{filename} is empty")));
        }

        let job = Job::new(JobId::generate(&name), name, self.settings.request_timeout);
        self.buckets.inputs.put(&job.source_key, image).await?;
        self.jobs.send(&wire::encode_job(&job)?).await?;
        info!(job_id = %job.id, name = %job.name, bytes = image.len(), "job submitted");

        if let Some(fleet) = &self.fleet
            && fleet.live_count() == 0
        {
            debug!(job_id = %job.id, "no live workers, requesting fleet check");
            fleet.request_check();
        }

        self.await_result(&job.id).await
    }

    /// Poll the result channel until the result for `job_id` shows up.
    pub async fn await_result(&self, job_id: &JobId) -> GatewayResult<ClassificationResult> {
        let started = Instant::now();
        let deadline = started + self.settings.request_timeout;
        let mut rounds = 0;

        while rounds < self.settings.max_rounds {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            rounds += 1;

            let opts = ReceiveOptions {
                max_messages: self.settings.max_messages,
                wait: self.settings.receive_wait.min(remaining),
                visibility_timeout: self.settings.result_visibility_timeout,
            };
            let deliveries = self.results.receive(&opts).await?;

            let mut matched: Option<(ClassificationResult, Receipt)> = None;
            for delivery in deliveries {
                let result = match wire::decode_result(&delivery.body) {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(message_id = %delivery.message_id, error = %e, "discarding malformed result");
                        self.ack(&delivery.receipt).await;
                        continue;
                    }
                };

                if result.job_id == *job_id {
                    if matched.is_some() {
                        debug!(%job_id, "duplicate result in batch");
                        self.ack(&delivery.receipt).await;
                    } else {
                        matched = Some((result, delivery.receipt));
                    }
                } else if result.is_expired(epoch_ms()) {
                    debug!(job_id = %result.job_id, "deleting abandoned result");
                    self.ack(&delivery.receipt).await;
                } else {
                    trace!(job_id = %result.job_id, "foreign result left for its owner");
                }
            }

            if let Some((result, receipt)) = matched {
                self.record(&result).await?;
                self.ack(&receipt).await;
                info!(
                    %job_id,
                    rounds,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "result received"
                );
                return Ok(result);
            }
        }

        let waited = started.elapsed();
        warn!(%job_id, rounds, waited_ms = waited.as_millis() as u64, "gave up waiting for result");
        Err(GatewayError::Timeout {
            job_id: job_id.clone(),
            waited,
            rounds,
        })
    }

    /// Persist a result's label under its job id, once. Returns whether
    /// this call wrote it.
    pub async fn record(&self, result: &ClassificationResult) -> GatewayResult<bool> {
        let Some(label) = result.outcome.label() else {
            return Ok(false);
        };
        let written = self
            .buckets
            .results
            .put_if_absent(result.job_id.as_str(), label.as_bytes())
            .await?;
        if !written {
            debug!(job_id = %result.job_id, "result already recorded");
        }
        Ok(written)
    }

    async fn ack(&self, receipt: &Receipt) {
        if let Err(e) = self.results.delete(receipt).await {
            warn!(%receipt, error = %e, "result delete failed");
        }
    }
}
