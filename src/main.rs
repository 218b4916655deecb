//! sleet: a standalone tool for loading a shared archive into a warehouse.
//!
//! Fetches a file from a file-sharing service, stages it in object storage,
//! extracts the archive, loads the data into an analytical warehouse table,
//! and runs the analytical queries.

mod analytics;
mod config;
mod error;
mod metrics;
mod pipeline;
mod stager;
mod storage;
mod transfer;
mod warehouse;

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{
    AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError, PipelineStorageSnafu,
    TransferSnafu, WarehouseClientSnafu,
};
use pipeline::run_pipeline;

/// Archive-to-warehouse loading tool.
#[derive(Parser, Debug)]
#[command(name = "sleet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("sleet starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("File id: {}", config.transfer.file_id);
        info!(
            "Staging: {}/{}/{}",
            config.staging.bucket_url, config.staging.folder, config.staging.archive_name
        );
        info!(
            "Warehouse: {}:{}.{} ({:?})",
            config.warehouse.project,
            config.warehouse.dataset,
            config.warehouse.table,
            config.warehouse.mode
        );
        info!("Load source prefix: {}", config.warehouse.source_uri_prefix);
        info!("Configuration is valid");
        return Ok(());
    }

    // Construct the clients once; every stage receives them by reference.
    let media = transfer::HttpMediaSource::new(&config.transfer.endpoint).context(TransferSnafu)?;
    let storage = Arc::new(
        storage::StorageProvider::for_url(&config.staging.bucket_url)
            .await
            .context(PipelineStorageSnafu)?,
    );
    let warehouse = warehouse::RestWarehouse::new(
        &config.warehouse.project,
        config.warehouse.endpoint.as_deref(),
    )
    .context(WarehouseClientSnafu)?;

    let stats = run_pipeline(&config, &media, storage, &warehouse).await?;

    info!("Pipeline completed successfully");
    info!("  Bytes transferred: {}", stats.bytes_transferred);
    info!("  Objects uploaded: {}", stats.objects_uploaded);
    info!("  Entries extracted: {}", stats.entries_extracted);
    info!("  Load jobs completed: {}", stats.load_jobs_completed);

    let report = analytics::run_analytics(
        &warehouse,
        &config.warehouse.dataset,
        &config.warehouse.table,
    )
    .await
    .context(error::QuerySnafu)?;

    print_ranked("Busiest day top user", &report.busiest_day_top_user);
    print_ranked("Top emoji", &report.top_emoji);
    print_ranked("Top mentioned users", &report.top_mentioned_users);

    Ok(())
}

fn print_ranked(title: &str, rows: &[(serde_json::Value, serde_json::Value)]) {
    info!("{}:", title);
    for (rank, (first, second)) in rows.iter().enumerate() {
        info!("  {}. {} {}", rank + 1, first, second);
    }
}
