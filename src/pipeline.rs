//! Main processing pipeline.
//!
//! Runs the stages in strict dependency order: fetch the archive from the
//! file-sharing service, stage it in the object store, extract its entries,
//! provision the warehouse, and load the extracted object. Every stage is a
//! sequential blocking call; one failure aborts the run.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::error::{
    ArchiveSnafu, ArchiveError, LoadSnafu, PipelineError, PipelineStorageSnafu, ProvisionSnafu,
    TransferSnafu,
};
use crate::stager::{ExtractOutcome, Stager};
use crate::storage::StorageProviderRef;
use crate::transfer::{self, MediaSource};
use crate::warehouse::{
    ensure_dataset, ensure_table, load_from_object_uri, LoadOptions, WarehouseClient,
};
use snafu::prelude::*;

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub bytes_transferred: usize,
    pub objects_uploaded: usize,
    pub entries_extracted: usize,
    pub load_jobs_completed: usize,
}

/// Run the full pipeline with injected clients.
///
/// The clients are constructed once by the caller and passed in; nothing in
/// the pipeline holds process-wide state.
pub async fn run_pipeline(
    config: &Config,
    media: &dyn MediaSource,
    storage: StorageProviderRef,
    warehouse: &dyn WarehouseClient,
) -> Result<PipelineStats, PipelineError> {
    let mut stats = PipelineStats::default();
    let stager = Stager::new(Arc::clone(&storage));
    let folder = &config.staging.folder;
    let archive_name = &config.staging.archive_name;

    info!("Fetching file {}", config.transfer.file_id);
    let payload = transfer::fetch(media, &config.transfer.file_id, config.transfer.chunk_size)
        .await
        .context(TransferSnafu)?;
    stats.bytes_transferred = payload.len();

    info!("Staging archive under {}/{}", folder, archive_name);
    stager
        .ensure_folder(folder)
        .await
        .context(PipelineStorageSnafu)?;
    stager
        .upload_blob(folder, archive_name, payload)
        .await
        .context(PipelineStorageSnafu)?;
    stats.objects_uploaded += 1;

    info!("Extracting {}", archive_name);
    let last_entry = match stager.extract_archive(folder, archive_name).await {
        ExtractOutcome::Extracted { last_entry, entries } => {
            stats.entries_extracted = entries;
            stats.objects_uploaded += entries;
            last_entry
        }
        ExtractOutcome::NotAnArchive { reason } | ExtractOutcome::Failed { reason } => {
            return Err(ArchiveError::Extraction {
                archive: format!("{folder}/{archive_name}"),
                reason,
            })
            .context(ArchiveSnafu);
        }
    };

    info!(
        "Provisioning {}.{}",
        config.warehouse.dataset, config.warehouse.table
    );
    ensure_dataset(warehouse, &config.warehouse.dataset, config.warehouse.mode)
        .await
        .context(ProvisionSnafu)?;
    ensure_table(
        warehouse,
        &config.warehouse.dataset,
        &config.warehouse.table,
        config.warehouse.mode,
    )
    .await
    .context(ProvisionSnafu)?;

    let options = LoadOptions {
        poll_interval: Duration::from_secs(config.warehouse.poll_interval_secs),
        timeout: config.warehouse.load_timeout_secs.map(Duration::from_secs),
    };
    load_from_object_uri(
        warehouse,
        &config.warehouse.source_uri_prefix,
        &config.warehouse.dataset,
        &config.warehouse.table,
        &last_entry,
        &options,
    )
    .await
    .context(LoadSnafu)?;
    stats.load_jobs_completed = 1;

    Ok(stats)
}
