//! pixd — the pixgrid daemon.
//!
//! # Usage
//!
//! ```text
//! pixd standalone --config pixgrid.toml --port 8080 --data-dir /var/lib/pixgrid
//! pixd config > pixgrid.toml
//! RUST_LOG=pixgrid_fleet=trace pixd --log-json standalone --in-memory
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pixgrid_core::PixgridConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixd", about = "pixgrid image classification daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run gateway, fleet controller and workers in one process.
    Standalone {
        /// Path to pixgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for blobs and channels (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep blobs and channels in memory only.
        #[arg(long)]
        in_memory: bool,
    },
    /// Print the default configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pixd=debug,pixgrid=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
            in_memory,
        } => {
            let mut config = PixgridConfig::load(config.as_deref())?;
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            config.storage.in_memory |= in_memory;
            config.validate()?;

            let classifier = pixgrid_worker::classifier::from_config(&config.classifier, &config.worker)?;
            info!(kind = ?config.classifier.kind, "classifier ready");

            pixd::run_standalone(config, classifier, port).await
        }
        Command::Config => {
            print!("{}", PixgridConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}
