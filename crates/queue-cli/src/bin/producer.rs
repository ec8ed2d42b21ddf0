//! Producer binary: enqueues timestamped sample messages at a fixed cadence
//! until interrupted with CTRL+C.

use clap::Parser;
use queue_cli::{build_client, load_settings, run_producer};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "producer", about = "Adds sample messages to a storage queue")]
struct Cli {
    /// Queue to add messages to, overriding the configured name
    #[arg(long)]
    queue: Option<String>,

    /// Milliseconds to wait between messages
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Use an in-process queue instead of the storage service
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,queue_client=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = load_settings()?;
    let client = build_client(&settings, cli.memory, cli.queue.as_deref())?;

    info!(
        queue = %client.queue_name(),
        interval_ms = cli.interval_ms,
        "Starting producer, press CTRL+C to stop"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let interval = std::time::Duration::from_millis(cli.interval_ms);
    let stats = run_producer(&client, interval, shutdown_rx).await?;

    info!(added = stats.added, "Producer stopped");
    Ok(())
}
