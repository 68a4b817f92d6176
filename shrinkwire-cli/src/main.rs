//! Shrinkwire CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shrinkwire_client::{BandwidthProbe, ProbeConfig};
use shrinkwire_compression::config::load_from_file;
use shrinkwire_core::BandwidthAccuracy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shrinkwire")]
#[command(about = "Bandwidth-aware HTTP response compression", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure the bandwidth to a Shrinkwire echo endpoint
    Probe {
        /// Echo endpoint URL
        #[arg(short, long)]
        url: String,

        /// Probe duration tier (quick, balanced, high, highest)
        #[arg(short, long, default_value = "quick")]
        accuracy: BandwidthAccuracy,

        /// Use the server send timestamp instead of the round trip
        #[arg(long)]
        sent_timestamp: bool,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Validate a compression configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "shrinkwire.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe {
            url,
            accuracy,
            sent_timestamp,
            log_level,
        } => {
            init_tracing(&log_level)?;

            let config = ProbeConfig::default()
                .with_accuracy(accuracy)
                .with_sent_timestamp(sent_timestamp);
            let probe = BandwidthProbe::new(config.clone());

            tracing::info!(url = %url, accuracy = %accuracy, "Probing bandwidth");
            let measurement = probe.measure(&url).await?;

            println!("Bytes received: {}", measurement.bytes_received);
            println!("Elapsed:        {:.1} ms", measurement.elapsed_ms);
            println!(
                "Bandwidth:      {:.3} B/ms ({:.1} KiB/s)",
                measurement.bytes_per_ms,
                measurement.bytes_per_ms * 1000.0 / 1024.0
            );
            if measurement.truncated {
                println!("Note: probe deadline reached, partial measurement");
            }
            if config.exceeds_threshold(measurement.bytes_per_ms) {
                println!("Above the default adaptive threshold, standard compression applies");
            }
            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_from_file(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Providers: {}", cfg.providers.join(", "));
                    tracing::info!("  Levels: {}", cfg.unique_levels().len());
                    tracing::info!(
                        "  Adaptive threshold: {:.3} B/ms",
                        cfg.max_bandwidth_bytes_per_ms()
                    );
                    println!("{}", serde_json::to_string_pretty(&cfg)?);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Shrinkwire");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

/// Filter at `level`, with connection pool noise kept at warn
fn log_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("{level},hyper_util=warn"))
        .with_context(|| format!("invalid log level '{level}'"))
}

/// `RUST_LOG` takes precedence over `--log-level`
fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => log_filter(level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}
