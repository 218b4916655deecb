//! Warehouse client seam and the operations built on top of it.
//!
//! The pipeline talks to the analytical warehouse exclusively through the
//! [`WarehouseClient`] trait: a REST implementation for the real service and
//! an in-process implementation for development and hermetic tests.

mod load;
mod memory;
mod provision;
mod query;
mod rest;

pub use load::{load_from_object_uri, LoadOptions};
pub use memory::MemoryWarehouse;
pub use provision::{ensure_dataset, ensure_table};
pub use query::run_query;
pub use rest::RestWarehouse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WarehouseError;

/// Create-or-overwrite behavior for dataset and table provisioning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Create when absent, leave untouched when present.
    #[default]
    Create,
    /// Delete (with contents) and recreate when present.
    Overwrite,
}

/// Identifier of a submitted load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed { message: String },
}

impl JobState {
    /// Whether the job has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed { .. })
    }
}

/// Source data format for load jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    NewlineDelimitedJson,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::NewlineDelimitedJson => "NEWLINE_DELIMITED_JSON",
        }
    }
}

/// Specification of a load job.
#[derive(Debug, Clone)]
pub struct LoadSpec {
    /// Fully qualified source object URI.
    pub source_uri: String,
    pub dataset: String,
    pub table: String,
    pub source_format: SourceFormat,
    /// Let the warehouse infer the schema from the data.
    pub autodetect: bool,
    /// Tolerate fields in the data that the schema does not know.
    pub ignore_unknown_values: bool,
}

/// A result row: positional column values.
pub type Row = Vec<Value>;

/// Conventional operations of the analytical warehouse.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool, WarehouseError>;

    async fn create_dataset(&self, dataset: &str) -> Result<(), WarehouseError>;

    /// Delete a dataset together with everything in it.
    async fn delete_dataset(&self, dataset: &str) -> Result<(), WarehouseError>;

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool, WarehouseError>;

    /// Create a table with an intentionally empty schema; the warehouse
    /// infers the real schema on first load.
    async fn create_table(&self, dataset: &str, table: &str) -> Result<(), WarehouseError>;

    async fn delete_table(&self, dataset: &str, table: &str) -> Result<(), WarehouseError>;

    /// Submit a load job and return its identifier without waiting.
    async fn begin_load(&self, spec: &LoadSpec) -> Result<JobId, WarehouseError>;

    /// Current state of a previously submitted job.
    async fn job_state(&self, job: &JobId) -> Result<JobState, WarehouseError>;

    /// Execute SQL and return all result rows.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError>;
}
