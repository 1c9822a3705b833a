//! In-process compute provider — each "instance" is a worker task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use pixgrid_blob::Buckets;
use pixgrid_channel::{MessageChannel, ReceiveOptions};
use pixgrid_fleet::{ComputeProvider, LaunchRequest};
use pixgrid_worker::{Classifier, Worker};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything a worker needs, cloned into each launch.
#[derive(Clone)]
pub struct WorkerFactory {
    pub jobs: Arc<dyn MessageChannel>,
    pub results: Arc<dyn MessageChannel>,
    pub buckets: Buckets,
    pub classifier: Arc<dyn Classifier>,
    pub receive: ReceiveOptions,
}

impl WorkerFactory {
    pub fn build(&self, name: &str) -> Worker {
        Worker::new(
            name,
            self.jobs.clone(),
            self.results.clone(),
            self.buckets.clone(),
            self.classifier.clone(),
            self.receive,
        )
    }
}

struct LocalInstance {
    name: String,
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

/// Runs workers as tokio tasks. Instance ids are `local-<n>`.
///
/// Stopping an instance, whether by `terminate` or by daemon shutdown,
/// lets its worker finish the job in hand before the task ends.
pub struct LocalProvider {
    factory: WorkerFactory,
    instances: Mutex<HashMap<String, LocalInstance>>,
    next_id: AtomicU64,
    /// Daemon-wide shutdown; stops every worker.
    shutdown: watch::Receiver<bool>,
}

impl LocalProvider {
    pub fn new(factory: WorkerFactory, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            factory,
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    pub async fn running(&self) -> usize {
        self.instances.lock().await.len()
    }
}

#[async_trait]
impl ComputeProvider for LocalProvider {
    async fn launch(&self, request: LaunchRequest) -> anyhow::Result<String> {
        let instance_id = format!("local-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let name = request.name().unwrap_or(&instance_id).to_string();
        let worker = self.factory.build(&name);

        let (stop, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop);
        let relay = stop.clone();
        let mut daemon_shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            let run = worker.run(stop_rx);
            tokio::pin!(run);
            tokio::select! {
                _ = &mut run => return,
                _ = daemon_shutdown.changed() => {
                    let _ = relay.send(true);
                }
            }
            run.await;
        });

        info!(%instance_id, %name, image = %request.image_id, "local worker started");
        self.instances.lock().await.insert(
            instance_id.clone(),
            LocalInstance { name, stop, task },
        );
        Ok(instance_id)
    }

    /// Stop the worker and wait until it has finished any job in hand.
    async fn terminate(&self, instance_id: &str) -> anyhow::Result<()> {
        let instance = self
            .instances
            .lock()
            .await
            .remove(instance_id)
            .ok_or_else(|| anyhow::anyhow!("unknown instance: {instance_id}"))?;

        let _ = instance.stop.send(true);
        if let Err(e) = instance.task.await {
            debug!(%instance_id, error = %e, "worker task ended abnormally");
        }
        info!(%instance_id, name = %instance.name, "local worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use pixgrid_channel::ChannelStore;
    use pixgrid_worker::LookupClassifier;

    use super::*;

    fn provider(shutdown: watch::Receiver<bool>) -> LocalProvider {
        let store = ChannelStore::open_in_memory().unwrap();
        let factory = WorkerFactory {
            jobs: Arc::new(store.channel("jobs").unwrap()),
            results: Arc::new(store.channel("results").unwrap()),
            buckets: Buckets::in_memory().unwrap(),
            classifier: Arc::new(LookupClassifier::from_csv("cat,feline").unwrap()),
            receive: ReceiveOptions {
                max_messages: 1,
                wait: Duration::from_millis(20),
                visibility_timeout: Duration::from_secs(1),
            },
        };
        LocalProvider::new(factory, shutdown)
    }

    fn request(name: &str) -> LaunchRequest {
        LaunchRequest {
            image_id: "local".into(),
            tags: BTreeMap::from([("Name".to_string(), name.to_string())]),
        }
    }

    #[tokio::test]
    async fn launch_and_terminate() {
        let (_tx, rx) = watch::channel(false);
        let provider = provider(rx);

        let a = provider.launch(request("worker-a")).await.unwrap();
        let b = provider.launch(request("worker-b")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(provider.running().await, 2);

        tokio::time::timeout(Duration::from_secs(1), provider.terminate(&a))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(provider.running().await, 1);
    }

    #[tokio::test]
    async fn terminate_unknown_instance_fails() {
        let (_tx, rx) = watch::channel(false);
        let provider = provider(rx);
        assert!(provider.terminate("local-99").await.is_err());
    }
}
