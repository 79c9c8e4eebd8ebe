//! Sightline live sighting bridge daemon.
//!
//! Connects to the EDR event stream, extracts indicator values from each
//! event, filters them through the cooldown cache, and reports surviving
//! sightings to the intel platform.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config file
//! sightline-bridge
//!
//! # Run with a custom config and a longer cooldown
//! sightline-bridge --config /etc/sightline/config.toml --cooldown-secs 300
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) stops the stream producer, closes the work queue, and
//! lets the drain loop finish in-flight events before exiting.

use anyhow::{Context, Result};
use clap::Parser;
use sightline_bridge::{
    drain, work_queue, Config, EdrClient, EventStream, IntelClient, SightingsUpdater,
    StreamConfig,
};
use sightline_core::metrics::{init_metrics, start_metrics_server};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Sightline live sighting bridge daemon.
#[derive(Parser, Debug)]
#[command(name = "sightline-bridge")]
#[command(about = "Report EDR indicator sightings to a threat-intel platform")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(long, short, default_value = "./config.toml")]
    config: PathBuf,

    /// Override the dedup cooldown (seconds)
    #[arg(long)]
    cooldown_secs: Option<u64>,

    /// Override the telemetry channel fed to the extractor
    #[arg(long)]
    channel: Option<String>,

    /// Override the work queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,

    /// Skip the liveness probe before (re)connecting to the stream
    #[arg(long)]
    no_wait: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("sightline_bridge=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Sightline bridge starting...");

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(cooldown) = args.cooldown_secs {
        config.bridge.cooldown_secs = cooldown;
    }
    if let Some(channel) = args.channel {
        config.bridge.channel = channel;
    }
    if let Some(capacity) = args.queue_capacity {
        config.bridge.queue_capacity = capacity;
    }

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
    }

    let edr = EdrClient::new(&config.edr.url, &config.edr.key, config.edr.verify)?;
    let intel = IntelClient::new(&config.intel.url, &config.intel.key, config.intel.verify)?;

    // Unreachable collaborators or rejected credentials at startup are
    // fatal misconfiguration; transient faults later are not.
    edr.probe()
        .await
        .with_context(|| format!("EDR API unreachable at {}", config.edr.url))?;
    intel
        .probe()
        .await
        .with_context(|| format!("Intel platform unreachable at {}", config.intel.url))?;

    tracing::info!("Configuration:");
    tracing::info!("  EDR: {}", config.edr.url);
    tracing::info!("  Intel: {}", config.intel.url);
    tracing::info!("  Channel: {}", config.bridge.channel);
    tracing::info!("  Cooldown: {}s", config.bridge.cooldown_secs);
    tracing::info!("  Queue capacity: {}", config.bridge.queue_capacity);

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running_for_signal.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let stream_config = StreamConfig {
        wait_for_service: !args.no_wait,
        verify_tls: config.edr.verify,
        ..StreamConfig::default()
    };
    let stream = Arc::new(EventStream::new(edr, stream_config));
    let updater = Arc::new(SightingsUpdater::new(
        intel,
        config.cooldown(),
        config.bridge.channel.clone(),
    ));

    let (tx, rx) = work_queue(config.bridge.queue_capacity);

    // Producer: the auto-reconnecting stream. Dropping `tx` when it exits
    // closes the queue and ends the drain loop after in-flight work.
    let producer = {
        let stream = Arc::clone(&stream);
        let running = Arc::clone(&running);
        tokio::spawn(async move { stream.run(tx, running).await })
    };

    // Consumer: the drain loop feeding the sighting handler.
    let consumer = {
        let updater = Arc::clone(&updater);
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            drain(rx, running, move |event| {
                let updater = Arc::clone(&updater);
                async move { updater.handle_event(&event).await.map(|_| ()) }
            })
            .await
        })
    };

    // Periodic cache sweep bounds memory on long-lived deployments.
    if config.bridge.sweep_secs > 0 {
        let updater = Arc::clone(&updater);
        let running = Arc::clone(&running);
        let sweep_interval = Duration::from_secs(config.bridge.sweep_secs);
        let sweep_age = config.cooldown();
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(sweep_interval).await;
                updater.sweep_cache(sweep_age);
            }
        });
    }

    let stream_stats = producer.await.context("Stream task panicked")??;
    let drain_stats = consumer.await.context("Drain task panicked")?;

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events received:   {}", stream_stats.events);
    tracing::info!("Parse errors:      {}", stream_stats.parse_errors);
    tracing::info!("Reconnects:        {}", stream_stats.reconnects);
    tracing::info!("Events handled:    {}", drain_stats.handled);
    tracing::info!("Handler errors:    {}", drain_stats.handler_errors);

    Ok(())
}
