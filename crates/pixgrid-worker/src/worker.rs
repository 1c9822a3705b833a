//! Worker loop — one job at a time from the job channel.
//!
//! For each delivery: fetch the image, classify it, write the label to the
//! `outputs` bucket, publish the result, and only then delete the job.
//! Any failure leaves the job undeleted; it reappears after its visibility
//! timeout and some worker tries again. There is no retry cap, so a job
//! that can never succeed is retried indefinitely.

use std::sync::Arc;
use std::time::Duration;

use pixgrid_blob::Buckets;
use pixgrid_channel::{Delivery, MessageChannel, ReceiveOptions};
use pixgrid_core::{ClassificationResult, Job, epoch_ms, wire};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::error::WorkerResult;

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Result published and job deleted.
    Completed(ClassificationResult),
    /// Nobody is waiting any more; job deleted unprocessed.
    Expired,
}

pub struct Worker {
    id: String,
    jobs: Arc<dyn MessageChannel>,
    results: Arc<dyn MessageChannel>,
    buckets: Buckets,
    classifier: Arc<dyn Classifier>,
    receive: ReceiveOptions,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        jobs: Arc<dyn MessageChannel>,
        results: Arc<dyn MessageChannel>,
        buckets: Buckets,
        classifier: Arc<dyn Classifier>,
        receive: ReceiveOptions,
    ) -> Self {
        Self {
            id: id.into(),
            jobs,
            results,
            buckets,
            classifier,
            receive: ReceiveOptions {
                max_messages: 1,
                ..receive
            },
        }
    }

    /// Poll until `shutdown` fires. Failures never end the loop.
    ///
    /// Shutdown is only observed while waiting for work; a job that has
    /// been received is always finished first, so retiring a busy worker
    /// drains it instead of abandoning the job.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, "worker started");
        loop {
            let received = tokio::select! {
                res = self.jobs.receive(&self.receive) => res,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok(deliveries) => {
                    self.handle_all(&deliveries).await;
                }
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "receive failed");
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }
        info!(worker = %self.id, "worker stopped");
    }

    /// Handle every delivery of one receive. Returns how many jobs were
    /// completed or dropped as expired.
    async fn handle_all(&self, deliveries: &[Delivery]) -> usize {
        let mut handled = 0;
        for delivery in deliveries {
            match self.handle(delivery).await {
                Ok(_) => handled += 1,
                Err(e) => warn!(
                    worker = %self.id,
                    message_id = %delivery.message_id,
                    receive_count = delivery.receive_count,
                    error = %e,
                    "job failed, left for redelivery"
                ),
            }
        }
        handled
    }

    /// Handle one delivery. On error the job is left undeleted.
    pub async fn handle(&self, delivery: &Delivery) -> WorkerResult<Handled> {
        let job = wire::decode_job(&delivery.body)?;

        if job.is_expired(epoch_ms()) {
            self.jobs.delete(&delivery.receipt).await?;
            info!(worker = %self.id, job_id = %job.id, "expired job dropped");
            return Ok(Handled::Expired);
        }

        let result = self.process(&job).await?;

        if let Err(e) = self.jobs.delete(&delivery.receipt).await {
            // Already published; a redelivery only produces a duplicate result.
            warn!(worker = %self.id, job_id = %job.id, error = %e, "job delete failed");
        }
        Ok(Handled::Completed(result))
    }

    /// Classify one job and publish its result.
    pub async fn process(&self, job: &Job) -> WorkerResult<ClassificationResult> {
        let image = self.buckets.inputs.get(&job.source_key).await?;
        debug!(worker = %self.id, job_id = %job.id, bytes = image.len(), "image fetched");

        let outcome = self.classifier.classify(job, &image).await?;
        if let Some(label) = outcome.label() {
            self.buckets
                .outputs
                .put(job.id.as_str(), label.as_bytes())
                .await?;
        }

        let result = ClassificationResult::for_job(job, outcome);
        self.results.send(&wire::encode_result(&result)?).await?;
        info!(
            worker = %self.id,
            job_id = %job.id,
            outcome = ?result.outcome,
            "result published"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use pixgrid_channel::{ChannelError, ChannelResult, ChannelStore, Receipt};
    use pixgrid_core::{JobId, Outcome};
    use tokio::sync::Notify;

    use super::*;
    use crate::error::WorkerError;

    impl Worker {
        /// One receive-and-handle step of the run loop.
        async fn poll_once(&self) -> WorkerResult<usize> {
            let deliveries = self.jobs.receive(&self.receive).await?;
            Ok(self.handle_all(&deliveries).await)
        }
    }

    /// Signals when classification starts, then takes `delay` to answer.
    struct SlowClassifier {
        started: Notify,
        delay: Duration,
    }

    #[async_trait]
    impl Classifier for SlowClassifier {
        async fn classify(&self, _job: &Job, _image: &[u8]) -> WorkerResult<Outcome> {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            Ok(Outcome::Classified {
                label: "feline".into(),
            })
        }
    }

    /// Job channel whose first receive fails.
    struct FlakyChannel {
        inner: Arc<dyn MessageChannel>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl MessageChannel for FlakyChannel {
        async fn send(&self, body: &str) -> ChannelResult<String> {
            self.inner.send(body).await
        }

        async fn receive(&self, opts: &ReceiveOptions) -> ChannelResult<Vec<Delivery>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(ChannelError::Transaction("connection reset".into()));
            }
            self.inner.receive(opts).await
        }

        async fn delete(&self, receipt: &Receipt) -> ChannelResult<()> {
            self.inner.delete(receipt).await
        }

        async fn approximate_length(&self) -> ChannelResult<u64> {
            self.inner.approximate_length().await
        }
    }

    fn worker_with(
        f: &Fixture,
        jobs: Arc<dyn MessageChannel>,
        classifier: Arc<dyn Classifier>,
    ) -> Arc<Worker> {
        Arc::new(Worker::new(
            "worker-custom",
            jobs,
            f.results.clone(),
            f.buckets.clone(),
            classifier,
            ReceiveOptions {
                max_messages: 1,
                wait: Duration::from_millis(20),
                visibility_timeout: Duration::from_secs(5),
            },
        ))
    }

    async fn wait_for_result(f: &Fixture) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while f.results.approximate_length().await.unwrap() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "no result published");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    struct StaticClassifier {
        labels: HashMap<&'static str, &'static str>,
        calls: AtomicU32,
    }

    impl StaticClassifier {
        fn new() -> Self {
            Self {
                labels: HashMap::from([("cat", "feline"), ("dog", "canine")]),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Classifier for StaticClassifier {
        async fn classify(&self, job: &Job, _image: &[u8]) -> WorkerResult<Outcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match job.name.as_str() {
                "broken" => Err(WorkerError::Classifier("model crashed".into())),
                name => Ok(match self.labels.get(name) {
                    Some(label) => Outcome::Classified {
                        label: label.to_string(),
                    },
                    None => Outcome::Unrecognized,
                }),
            }
        }
    }

    struct Fixture {
        worker: Worker,
        jobs: Arc<dyn MessageChannel>,
        results: Arc<dyn MessageChannel>,
        buckets: Buckets,
        classifier: Arc<StaticClassifier>,
    }

    fn fixture() -> Fixture {
        let store = ChannelStore::open_in_memory()
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let jobs: Arc<dyn MessageChannel> = Arc::new(store.channel("jobs").unwrap());
        let results: Arc<dyn MessageChannel> = Arc::new(store.channel("results").unwrap());
        let buckets = Buckets::in_memory().unwrap();
        let classifier = Arc::new(StaticClassifier::new());
        let worker = Worker::new(
            "worker-test",
            jobs.clone(),
            results.clone(),
            buckets.clone(),
            classifier.clone(),
            ReceiveOptions {
                max_messages: 1,
                wait: Duration::from_millis(20),
                visibility_timeout: Duration::from_millis(50),
            },
        );
        Fixture {
            worker,
            jobs,
            results,
            buckets,
            classifier,
        }
    }

    async fn submit(f: &Fixture, name: &str, ttl: Duration) -> Job {
        let job = Job::new(JobId::generate(name), name, ttl);
        f.buckets.inputs.put(&job.source_key, b"png").await.unwrap();
        f.jobs.send(&wire::encode_job(&job).unwrap()).await.unwrap();
        job
    }

    async fn drain_results(f: &Fixture) -> Vec<ClassificationResult> {
        let deliveries = f
            .results
            .receive(&ReceiveOptions {
                max_messages: 10,
                wait: Duration::ZERO,
                visibility_timeout: Duration::from_secs(60),
            })
            .await
            .unwrap();
        deliveries
            .iter()
            .map(|d| wire::decode_result(&d.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn publishes_exactly_one_result_per_job() {
        let f = fixture();
        let job = submit(&f, "cat", Duration::from_secs(60)).await;

        assert_eq!(f.worker.poll_once().await.unwrap(), 1);

        let results = drain_results(&f).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_id, job.id);
        assert_eq!(results[0].display_line().as_deref(), Some("cat:feline"));

        assert_eq!(f.buckets.outputs.get(job.id.as_str()).await.unwrap(), b"feline");

        // The job is gone, even after its visibility timeout.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(f.jobs.approximate_length().await.unwrap(), 0);
        assert_eq!(f.worker.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unrecognized_image_publishes_without_output() {
        let f = fixture();
        let job = submit(&f, "horse", Duration::from_secs(60)).await;

        f.worker.poll_once().await.unwrap();
        let results = drain_results(&f).await;
        assert_eq!(results[0].outcome, Outcome::Unrecognized);
        assert!(!f.buckets.outputs.exists(job.id.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn missing_image_leaves_job_for_redelivery() {
        let f = fixture();
        let job = Job::new(JobId::generate("cat"), "cat", Duration::from_secs(60));
        f.jobs.send(&wire::encode_job(&job).unwrap()).await.unwrap();

        assert_eq!(f.worker.poll_once().await.unwrap(), 0);
        assert!(drain_results(&f).await.is_empty());

        // Upload arrives late; the redelivered job now succeeds.
        f.buckets.inputs.put(&job.source_key, b"png").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let delivery = f
            .jobs
            .receive(&ReceiveOptions {
                max_messages: 1,
                wait: Duration::from_millis(100),
                visibility_timeout: Duration::from_secs(5),
            })
            .await
            .unwrap()
            .remove(0);
        assert_eq!(delivery.receive_count, 2);
        assert!(matches!(
            f.worker.handle(&delivery).await.unwrap(),
            Handled::Completed(_)
        ));
    }

    #[tokio::test]
    async fn classifier_failure_retries_forever() {
        let f = fixture();
        submit(&f, "broken", Duration::from_secs(60)).await;

        for _ in 0..3 {
            f.worker.poll_once().await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert_eq!(f.classifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.jobs.approximate_length().await.unwrap(), 1);
        assert!(drain_results(&f).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_job_is_not_deleted() {
        let f = fixture();
        f.jobs.send("{broken json").await.unwrap();

        assert_eq!(f.worker.poll_once().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.jobs.approximate_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_job_is_dropped_unprocessed() {
        let f = fixture();
        submit(&f, "cat", Duration::ZERO).await;

        assert_eq!(f.worker.poll_once().await.unwrap(), 1);
        assert_eq!(f.classifier.calls.load(Ordering::SeqCst), 0);
        assert!(drain_results(&f).await.is_empty());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.jobs.approximate_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bare_id_job_is_processed() {
        let f = fixture();
        f.buckets.inputs.put("dog", b"png").await.unwrap();
        f.jobs.send("dog").await.unwrap();

        f.worker.poll_once().await.unwrap();
        let results = drain_results(&f).await;
        assert_eq!(results[0].display_line().as_deref(), Some("dog:canine"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = fixture();
        submit(&f, "cat", Duration::from_secs(60)).await;
        let (tx, rx) = watch::channel(false);

        let worker = worker_with(&f, f.jobs.clone(), f.classifier.clone());
        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(rx).await })
        };

        wait_for_result(&f).await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_mid_job_finishes_the_job_first() {
        let f = fixture();
        submit(&f, "cat", Duration::from_secs(60)).await;
        let classifier = Arc::new(SlowClassifier {
            started: Notify::new(),
            delay: Duration::from_millis(200),
        });
        let worker = worker_with(&f, f.jobs.clone(), classifier.clone());
        let (tx, rx) = watch::channel(false);

        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(rx).await })
        };
        tokio::time::timeout(Duration::from_secs(2), classifier.started.notified())
            .await
            .unwrap();
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        let results = drain_results(&f).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].display_line().as_deref(), Some("cat:feline"));
        assert_eq!(f.jobs.approximate_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn receive_error_does_not_end_run() {
        let f = fixture();
        submit(&f, "dog", Duration::from_secs(60)).await;
        let jobs: Arc<dyn MessageChannel> = Arc::new(FlakyChannel {
            inner: f.jobs.clone(),
            failed: AtomicBool::new(false),
        });
        let worker = worker_with(&f, jobs, f.classifier.clone());
        let (tx, rx) = watch::channel(false);

        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(rx).await })
        };
        wait_for_result(&f).await;
        assert!(!task.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drain_results(&f).await[0].display_line().as_deref(), Some("dog:canine"));
    }
}
