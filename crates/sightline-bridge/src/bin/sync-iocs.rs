//! Indicator reconciliation CLI.
//!
//! Pulls indicator changes from the intel platform and applies them to the
//! EDR indicator store, either as a single cycle or as a long-running
//! service on a fixed interval.
//!
//! ```bash
//! # Catch up on the last day of changes (the default)
//! sync-iocs --config /etc/sightline/config.toml
//!
//! # Last day of changes, unpublished records included
//! sync-iocs --all
//!
//! # Walk the whole repository, published and unpublished alike
//! sync-iocs --all --full
//!
//! # Run forever, one cycle per minute
//! sync-iocs --service
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use sightline_bridge::{run_service, Config, EdrClient, IntelClient, ReconcileOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Interval between cycles in service mode.
const SERVICE_INTERVAL: Duration = Duration::from_secs(60);

/// Reconcile intel platform indicators into the EDR store.
#[derive(Parser, Debug)]
#[command(name = "sync-iocs")]
#[command(about = "Reconcile threat-intel indicators into the EDR store")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(long, short, default_value = "./config.toml")]
    config: PathBuf,

    /// Sync changes from the last N days
    #[arg(long, default_value = "1", conflicts_with = "full")]
    last: i64,

    /// Include unpublished records
    #[arg(long)]
    all: bool,

    /// Ignore the lookback window and walk the whole repository
    #[arg(long)]
    full: bool,

    /// Run as a service, reconciling once per minute
    #[arg(long)]
    service: bool,

    /// Override the source name stamped on synced indicators
    #[arg(long)]
    source: Option<String>,
}

/// Map CLI flags to reconciliation parameters.
///
/// `--all` widens publication state only; the lookback watermark stays in
/// place unless `--full` drops it.
fn reconcile_options(args: &Args, default_source: &str, now: DateTime<Utc>) -> ReconcileOptions {
    ReconcileOptions {
        source: args
            .source
            .clone()
            .unwrap_or_else(|| default_source.to_string()),
        since: if args.full {
            None
        } else {
            Some(now - ChronoDuration::days(args.last))
        },
        include_unpublished: args.all,
    }
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

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let edr = EdrClient::new(&config.edr.url, &config.edr.key, config.edr.verify)?;
    let intel = IntelClient::new(&config.intel.url, &config.intel.key, config.intel.verify)?;

    edr.probe()
        .await
        .with_context(|| format!("EDR API unreachable at {}", config.edr.url))?;
    intel
        .probe()
        .await
        .with_context(|| format!("Intel platform unreachable at {}", config.intel.url))?;

    let options = reconcile_options(&args, &config.intel.name, Utc::now());

    match &options.since {
        Some(since) => tracing::info!("Reconciling changes since {}", since.to_rfc3339()),
        None => tracing::info!("Reconciling all records"),
    }

    if args.service {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_signal = Arc::clone(&running);
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown signal received, finishing current cycle...");
            running_for_signal.store(false, Ordering::SeqCst);
        })
        .context("Failed to set Ctrl+C handler")?;

        run_service(&intel, &edr, &options, SERVICE_INTERVAL, running).await?;
    } else {
        let outcome = sightline_bridge::reconcile(&intel, &edr, &options).await?;
        tracing::info!(
            "Done: {} added, {} deleted, {} failures",
            outcome.added.len(),
            outcome.deleted.len(),
            outcome.apply_failures
        );
        if outcome.apply_failures > 0 {
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("sync-iocs").chain(argv.iter().copied()))
    }

    #[test]
    fn test_all_widens_publication_but_keeps_watermark() {
        let now = Utc::now();
        let options = reconcile_options(&parse(&["--all"]), "misp", now);
        assert!(options.include_unpublished);
        assert_eq!(options.since, Some(now - ChronoDuration::days(1)));
    }

    #[test]
    fn test_full_drops_watermark() {
        let now = Utc::now();
        let options = reconcile_options(&parse(&["--full"]), "misp", now);
        assert_eq!(options.since, None);
        assert!(!options.include_unpublished);

        let options = reconcile_options(&parse(&["--all", "--full"]), "misp", now);
        assert_eq!(options.since, None);
        assert!(options.include_unpublished);
    }

    #[test]
    fn test_last_sets_lookback_days() {
        let now = Utc::now();
        let options = reconcile_options(&parse(&["--last", "7"]), "misp", now);
        assert_eq!(options.since, Some(now - ChronoDuration::days(7)));
    }

    #[test]
    fn test_source_defaults_to_config_name() {
        let now = Utc::now();
        let options = reconcile_options(&parse(&[]), "misp", now);
        assert_eq!(options.source, "misp");

        let options = reconcile_options(&parse(&["--source", "custom"]), "misp", now);
        assert_eq!(options.source, "custom");
    }
}
