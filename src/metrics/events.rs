//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted after each chunk of a media download.
pub struct TransferProgress {
    pub fraction: f64,
}

impl InternalEvent for TransferProgress {
    fn emit(self) {
        trace!(fraction = self.fraction, "Transfer progress");
        gauge!("sleet_transfer_progress").set(self.fraction);
    }
}

/// Event emitted when a media download completes.
pub struct TransferCompleted {
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for TransferCompleted {
    fn emit(self) {
        trace!(bytes = self.bytes, "Transfer completed");
        counter!("sleet_bytes_transferred_total").increment(self.bytes);
        histogram!("sleet_transfer_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Kind of object storage request.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Head,
    Get,
    Put,
    List,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Head => "head",
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
        }
    }
}

/// Outcome of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for each object storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "sleet_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when an archive entry is re-uploaded as an object.
pub struct ArchiveEntryExtracted {
    pub bytes: u64,
}

impl InternalEvent for ArchiveEntryExtracted {
    fn emit(self) {
        trace!(bytes = self.bytes, "Archive entry extracted");
        counter!("sleet_archive_entries_extracted_total").increment(1);
        counter!("sleet_archive_bytes_extracted_total").increment(self.bytes);
    }
}

/// Event emitted when archive extraction finishes.
pub struct ArchiveExtractionCompleted {
    pub duration: Duration,
}

impl InternalEvent for ArchiveExtractionCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "Archive extraction completed"
        );
        histogram!("sleet_archive_extraction_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a warehouse load job reaches a terminal success state.
pub struct LoadJobCompleted {
    pub duration: Duration,
}

impl InternalEvent for LoadJobCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "Load job completed"
        );
        counter!("sleet_load_jobs_completed_total").increment(1);
        histogram!("sleet_load_job_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when an analytical query completes.
pub struct QueryCompleted {
    pub name: &'static str,
    pub rows: usize,
    pub duration: Duration,
}

impl InternalEvent for QueryCompleted {
    fn emit(self) {
        trace!(name = self.name, rows = self.rows, "Query completed");
        counter!("sleet_queries_completed_total", "query" => self.name).increment(1);
        histogram!("sleet_query_duration_seconds", "query" => self.name)
            .record(self.duration.as_secs_f64());
    }
}
