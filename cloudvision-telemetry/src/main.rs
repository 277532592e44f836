//! CloudVision gNMI telemetry collector
//!
//! Subscribes to every streaming device known to CloudVision and flushes
//! the resulting measurements to stdout or Zenoh.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cloudvision_common::init_tracing;
use cloudvision_telemetry::config::OutputKind;
use cloudvision_telemetry::output::{self, Output, ZenohPublisher};
use cloudvision_telemetry::{ChannelAccumulator, Collector, CollectorConfig, InventoryClient};

/// CloudVision gNMI telemetry collector
#[derive(Parser, Debug)]
#[command(name = "cloudvision-telemetry")]
#[command(about = "Collect gNMI streaming telemetry from Arista CloudVision")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cloudvision.json5")]
    config: String,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = CollectorConfig::load_from_file(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize logging
    init_tracing(&config.logging)?;

    info!(
        address = %config.cloudvision.address,
        subscriptions = config.cloudvision.subscriptions.len(),
        "Starting CloudVision collector"
    );

    let session = match config.output.kind {
        OutputKind::Zenoh => {
            let session = Arc::new(cloudvision_common::connect(&config.zenoh).await?);
            info!("Connected to Zenoh");
            Some(session)
        }
        OutputKind::Stdout => None,
    };
    let output = match &session {
        Some(session) => Output::Zenoh(ZenohPublisher::new(
            session.clone(),
            config.output.key_prefix.clone(),
            config.output.serialization,
        )),
        None => Output::Stdout,
    };

    let (accumulator, rx) = ChannelAccumulator::new();
    let output_cancel = CancellationToken::new();
    let output_task = tokio::spawn(output::run(
        output,
        rx,
        Duration::from_millis(config.output.flush_interval_ms.max(1)),
        output_cancel.clone(),
    ));

    let discovery = InventoryClient::new(
        &config.cloudvision.address,
        config.cloudvision.token(),
    )?;
    let mut collector = Collector::new(config.cloudvision, discovery);
    collector.start(Arc::new(accumulator))?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    collector.stop().await;

    // Flush what the subscribers produced before they stopped.
    output_cancel.cancel();
    output_task.await?;

    if let Some(session) = session {
        session
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close session: {}", e))?;
    }
    info!("CloudVision collector shutdown complete");

    Ok(())
}
