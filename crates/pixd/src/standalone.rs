//! Standalone mode — every component in one process.
//!
//! 1. Opens the blob store and the channel store (on disk or in memory)
//! 2. Builds the fleet controller over a [`LocalProvider`]
//! 3. Builds the gateway, wired to the fleet for cold-start checks
//! 4. Serves HTTP until Ctrl-C, then stops the controller and all workers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use pixgrid_blob::{BlobDb, Buckets};
use pixgrid_channel::{ChannelStore, MessageChannel, ReceiveOptions};
use pixgrid_core::PixgridConfig;
use pixgrid_fleet::{FleetController, FleetHandle, ScalingPolicy};
use pixgrid_gateway::{Gateway, GatewaySettings};
use pixgrid_worker::Classifier;
use tokio::sync::watch;
use tracing::{error, info};

use crate::local::{LocalProvider, WorkerFactory};

/// The assembled pipeline, minus the controller loop.
pub struct Pipeline {
    pub gateway: Arc<Gateway>,
    pub fleet: FleetHandle,
    pub provider: Arc<LocalProvider>,
    pub jobs: Arc<dyn MessageChannel>,
    pub results: Arc<dyn MessageChannel>,
    pub buckets: Buckets,
    pub fleet_interval: Duration,
    max_upload_bytes: usize,
}

impl Pipeline {
    /// Open storage and wire all components. The controller is returned
    /// separately so the caller decides when to run it.
    pub fn build(
        config: &PixgridConfig,
        classifier: Arc<dyn Classifier>,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<(Self, FleetController)> {
        config.validate()?;

        let (blobs, channels) = if config.storage.in_memory {
            (BlobDb::open_in_memory()?, ChannelStore::open_in_memory()?)
        } else {
            let dir = &config.storage.data_dir;
            std::fs::create_dir_all(dir)?;
            (
                BlobDb::open(&dir.join("blobs.redb"))?,
                ChannelStore::open(&dir.join("channels.redb"))?,
            )
        };

        let buckets = Buckets::from_db(&blobs)?;
        let jobs: Arc<dyn MessageChannel> = Arc::new(channels.channel(pixgrid_channel::JOBS)?);
        let results: Arc<dyn MessageChannel> =
            Arc::new(channels.channel(pixgrid_channel::RESULTS)?);

        let factory = WorkerFactory {
            jobs: jobs.clone(),
            results: results.clone(),
            buckets: buckets.clone(),
            classifier,
            receive: ReceiveOptions {
                max_messages: 1,
                wait: config.worker.receive_wait,
                visibility_timeout: config.worker.visibility_timeout,
            },
        };
        let provider = Arc::new(LocalProvider::new(factory, shutdown));

        let controller = FleetController::new(
            ScalingPolicy::from(&config.fleet),
            config.fleet.image_id.clone(),
            provider.clone(),
            jobs.clone(),
        );
        let fleet = controller.handle();

        let gateway = Gateway::new(
            jobs.clone(),
            results.clone(),
            buckets.clone(),
            GatewaySettings::from(&config.gateway),
        )
        .with_fleet(fleet.clone());

        let pipeline = Self {
            gateway: Arc::new(gateway),
            fleet,
            provider,
            jobs,
            results,
            buckets,
            fleet_interval: config.fleet.interval,
            max_upload_bytes: config.gateway.max_upload_bytes,
        };
        Ok((pipeline, controller))
    }

    pub fn router(&self) -> Router {
        pixgrid_gateway::build_router(self.gateway.clone(), self.max_upload_bytes)
    }
}

/// Run the daemon until Ctrl-C.
pub async fn run_standalone(
    config: PixgridConfig,
    classifier: Arc<dyn Classifier>,
    port: u16,
) -> anyhow::Result<()> {
    info!("pixgrid daemon starting in standalone mode");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pipeline, controller) = Pipeline::build(&config, classifier, shutdown_rx.clone())?;
    info!(
        min = config.fleet.min_instances,
        max = config.fleet.max_instances,
        in_memory = config.storage.in_memory,
        "pipeline assembled"
    );

    // ── Start background tasks ─────────────────────────────────

    let interval = pipeline.fleet_interval;
    let fleet_handle = tokio::spawn(controller.run(interval, shutdown_rx));

    // ── Start HTTP server ──────────────────────────────────────

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, pipeline.router())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = fleet_handle.await;
    info!("pixgrid daemon stopped");
    Ok(())
}
