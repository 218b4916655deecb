//! Error types for sleet using snafu.
//!
//! One enum per subsystem, each with context selectors, aggregated into a
//! top-level [`PipelineError`].

use snafu::prelude::*;

// ============ Transfer Errors ============

/// Errors that can occur while fetching a file from the sharing service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransferError {
    /// HTTP client construction or request failure.
    #[snafu(display("Media request failed for file {file_id}"))]
    MediaRequest {
        source: reqwest::Error,
        file_id: String,
    },

    /// The service answered with a non-success status.
    #[snafu(display("Media request for file {file_id} returned status {status}"))]
    MediaStatus { status: u16, file_id: String },

    /// The service did not advertise a content length for the file.
    #[snafu(display("No content length available for file {file_id}"))]
    MissingLength { file_id: String },

    /// A ranged read returned no data before the buffer was complete.
    #[snafu(display("Short read at offset {offset} for file {file_id}"))]
    ShortRead { offset: u64, file_id: String },
}

// ============ Storage Errors ============

/// Errors that can occur during object storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error"))]
    GcsConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Archive Errors ============

/// Errors raised by the pipeline when archive extraction did not produce a
/// loadable object.
///
/// Extraction itself never returns an error; it reports an outcome value and
/// the pipeline converts a non-success outcome into this type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArchiveError {
    /// The staged object could not be extracted.
    #[snafu(display("Extraction of {archive} failed: {reason}"))]
    Extraction { archive: String, reason: String },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Transfer file id is empty.
    #[snafu(display("Transfer file id cannot be empty"))]
    EmptyFileId,

    /// Staging bucket URL is empty.
    #[snafu(display("Staging bucket URL cannot be empty"))]
    EmptyBucketUrl,

    /// Staging folder is empty.
    #[snafu(display("Staging folder cannot be empty"))]
    EmptyFolder,

    /// Warehouse project is empty.
    #[snafu(display("Warehouse project cannot be empty"))]
    EmptyProject,

    /// Warehouse dataset or table name is empty.
    #[snafu(display("Warehouse dataset and table names cannot be empty"))]
    EmptyTableName,

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Warehouse Errors ============

/// Errors surfaced by a warehouse client implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WarehouseError {
    /// HTTP transport failure.
    #[snafu(display("Warehouse request failed"))]
    Http { source: reqwest::Error },

    /// The warehouse answered with a non-success status.
    #[snafu(display("Warehouse returned status {status}: {message}"))]
    Api { status: u16, message: String },

    /// The requested resource does not exist.
    #[snafu(display("Warehouse resource not found: {resource}"))]
    NotFound { resource: String },

    /// Failed to decode a warehouse response body.
    #[snafu(display("Failed to decode warehouse response"))]
    Decode { source: reqwest::Error },

    /// The referenced load job is unknown to the backend.
    #[snafu(display("Unknown job: {job_id}"))]
    UnknownJob { job_id: String },

    /// The backend cannot answer this query.
    #[snafu(display("Unsupported query: {message}"))]
    UnsupportedQuery { message: String },
}

impl WarehouseError {
    /// Check if this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::NotFound { .. })
    }
}

// ============ Provision Errors ============

/// Errors that can occur while ensuring datasets and tables exist.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProvisionError {
    /// Dataset create/delete/lookup failed.
    #[snafu(display("Failed to provision dataset {dataset}"))]
    Dataset {
        source: WarehouseError,
        dataset: String,
    },

    /// Table create/delete/lookup failed.
    #[snafu(display("Failed to provision table {table}"))]
    Table {
        source: WarehouseError,
        table: String,
    },
}

// ============ Load Errors ============

/// Errors that can occur while running a warehouse load job.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// Job submission failed.
    #[snafu(display("Failed to submit load job"))]
    Submit { source: WarehouseError },

    /// Polling the job state failed.
    #[snafu(display("Failed to poll load job"))]
    Poll { source: WarehouseError },

    /// The job reached a terminal error state.
    #[snafu(display("Load job failed: {message}"))]
    JobFailed { message: String },

    /// The job did not reach a terminal state before the deadline.
    #[snafu(display("Load job did not finish within {seconds}s"))]
    Timeout { seconds: u64 },
}

// ============ Query Errors ============

/// Errors that can occur while executing a query.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueryError {
    /// Query execution failed (malformed SQL or transport failure).
    #[snafu(display("Query execution failed"))]
    Execute { source: WarehouseError },

    /// A result row carried fewer columns than the runner requires.
    #[snafu(display("Query row has {got} columns, expected at least 2"))]
    RowShape { got: usize },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Transfer error.
    #[snafu(display("Transfer error"))]
    Transfer { source: TransferError },

    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Archive extraction error.
    #[snafu(display("Archive error"))]
    Archive { source: ArchiveError },

    /// Provisioning error.
    #[snafu(display("Provision error"))]
    Provision { source: ProvisionError },

    /// Load job error.
    #[snafu(display("Load error"))]
    Load { source: LoadError },

    /// Query error.
    #[snafu(display("Query error"))]
    Query { source: QueryError },

    /// Warehouse client construction error.
    #[snafu(display("Warehouse client error"))]
    WarehouseClient { source: WarehouseError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

impl PipelineError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::PipelineStorage { source } => source.is_not_found(),
            _ => false,
        }
    }
}
