//! rethinkdb-exporter - Prometheus exporter for RethinkDB clusters
//!
//! Every scrape of the telemetry path reads `rethinkdb.stats`, counts
//! documents per table and exposes the result as gauges.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use rethinkdb_exporter::client::{ConnectionFactory, LazySession};
use rethinkdb_exporter::config::{CliArgs, ExporterConfig};
use rethinkdb_exporter::metrics::{Exporter, StatCollector};
use rethinkdb_exporter::server;

fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn run() -> Result<()> {
    let args = CliArgs::parse_args();
    setup_logging(args.verbose, args.quiet)?;

    let config = ExporterConfig::from_cli(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!("rethinkdb-exporter v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Cluster: {:?}",
        config
            .addresses
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
    );

    let tls = match config.tls {
        Some(ref tls) => Some(tls.load().context("Failed to load TLS configuration")?),
        None => None,
    };

    let factory = ConnectionFactory {
        addresses: config.addresses.clone(),
        auth: config.auth.clone(),
        tls,
        connect_timeout: config.connect_timeout,
        query_timeout: config.query_timeout,
        max_open: config.max_open,
    };

    // The first connection is made by the first scrape
    let session = LazySession::new(factory);
    let exporter = Arc::new(
        Exporter::new(
            Arc::new(session),
            StatCollector::new(config.collector.clone()),
            &config.namespace,
            &config.cluster_name,
        )
        .context("Failed to create exporter")?,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(server::serve(
        exporter,
        config.listen_address,
        &config.metrics_path,
    ))
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
