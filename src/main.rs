use anyhow::Context;
use bt2read::config::Config;
use bt2read::publisher::{discovery, mqtt::{self, MqttPublisher}};
use bt2read::{logging, BleTransport, PollScheduler, RunMode, SessionSettings, TransportSession};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// How long to wait for queued MQTT messages to go out before exiting
const MQTT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "bt2read")]
#[command(about = "Poll a Renogy charger through its BT-2 module and publish the readings to MQTT")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run nonstop and query the device every <INTERVAL> seconds. Without it, query once and exit.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Quiet mode. No output except for errors
    #[arg(short, long)]
    quiet: bool,

    /// Configuration file
    #[arg(short, long, default_value = "bt2read.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    logging::init(logging::level(args.debug, args.quiet), config.log_file.as_deref())
        .context("Failed to open log file")?;

    info!("Starting up");

    let entries = discovery::load(&config.discovery_file).with_context(|| {
        format!("Failed to load discovery entries from {}", config.discovery_file.display())
    })?;
    let (publisher, eventloop) = MqttPublisher::new(&config.mqtt, entries, !args.quiet);
    let publisher = Arc::new(publisher);
    let mqtt_task = tokio::spawn(mqtt::drive(eventloop));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let transport = BleTransport::new().await?;
    let session = TransportSession::new(transport, publisher.clone(), SessionSettings::from(&config.device));
    let mode = RunMode::from_interval_secs(args.interval);
    let result = PollScheduler::new(session, &config.device.address, mode, shutdown_rx)
        .run()
        .await;

    if let Err(err) = publisher.disconnect() {
        warn!(%err, "Failed to disconnect from MQTT broker");
    }
    if tokio::time::timeout(MQTT_FLUSH_TIMEOUT, mqtt_task).await.is_err() {
        warn!("Timed out flushing MQTT messages");
    }

    result.map_err(Into::into)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => warn!(%err, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
