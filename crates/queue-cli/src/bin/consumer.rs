//! Consumer binary: polls a storage queue, logs each retrieved message, and
//! deletes it, until interrupted with CTRL+C.

use chrono::Duration;
use clap::{Parser, ValueEnum};
use queue_cli::{build_client, load_settings, run_consumer, RetrievalMode};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// One message per poll
    Single,
    /// Up to --batch-size messages per poll
    Batch,
}

#[derive(Debug, Parser)]
#[command(name = "consumer", about = "Reads and deletes messages from a storage queue")]
struct Cli {
    /// Queue to read from, overriding the configured name
    #[arg(long)]
    queue: Option<String>,

    /// How messages are retrieved on each poll
    #[arg(long, value_enum, default_value = "single")]
    mode: Mode,

    /// Messages to retrieve per poll in batch mode
    #[arg(long, default_value_t = 16)]
    batch_size: u32,

    /// Seconds a batch stays hidden from other consumers
    #[arg(long, default_value_t = 300)]
    visibility_secs: i64,

    /// Milliseconds to wait between polls
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

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

    let mode = match cli.mode {
        Mode::Single => RetrievalMode::Single,
        Mode::Batch => RetrievalMode::Batch {
            count: cli.batch_size,
            visibility: Duration::seconds(cli.visibility_secs),
        },
    };

    info!(
        queue = %client.queue_name(),
        mode = ?mode,
        poll_ms = cli.poll_ms,
        "Starting consumer, press CTRL+C to stop"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let poll_interval = std::time::Duration::from_millis(cli.poll_ms);
    let stats = run_consumer(&client, mode, poll_interval, shutdown_rx).await?;

    info!(
        processed = stats.processed,
        empty_polls = stats.empty_polls,
        "Consumer stopped"
    );
    Ok(())
}
