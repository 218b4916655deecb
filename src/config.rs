//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files. Credentials are never part
//! of the config; clients read bearer tokens and service-account keys from
//! the host environment.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyBucketUrlSnafu, EmptyFileIdSnafu, EmptyFolderSnafu, EmptyProjectSnafu,
    EmptyTableNameSnafu, ReadFileSnafu, YamlParseSnafu,
};
use crate::warehouse::WriteMode;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transfer: TransferConfig,
    pub staging: StagingConfig,
    pub warehouse: WarehouseConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transfer configuration for the file-sharing service download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Identifier of the file to fetch from the sharing service.
    pub file_id: String,

    /// Base URL of the file-sharing service media API.
    #[serde(default = "default_media_endpoint")]
    pub endpoint: String,

    /// Download chunk size in bytes (default: 4 MiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_media_endpoint() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_chunk_size() -> usize {
    4 * MB
}

/// Staging configuration for the object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Bucket URL. Examples: "gs://my-bucket", "memory://staging", "/local/path"
    pub bucket_url: String,

    /// Folder prefix under which the archive and its entries are stored.
    pub folder: String,

    /// Object name for the staged archive (default: "archive.zip").
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
}

fn default_archive_name() -> String {
    "archive.zip".to_string()
}

/// Warehouse configuration for provisioning, loading, and querying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Warehouse project that owns the dataset.
    pub project: String,

    /// Dataset name.
    pub dataset: String,

    /// Table name.
    pub table: String,

    /// Create-or-overwrite behavior for dataset and table provisioning.
    #[serde(default)]
    pub mode: WriteMode,

    /// Source URI prefix for load jobs. The extracted object name is appended
    /// verbatim, so the prefix must already end with its separator.
    /// Example: "gs://my-bucket/tweets/"
    pub source_uri_prefix: String,

    /// Override for the warehouse API endpoint (default: public endpoint).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Seconds between load job state polls (default: 5).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Abort a load job that has not reached a terminal state after this many
    /// seconds (default: unlimited).
    #[serde(default)]
    pub load_timeout_secs: Option<u64>,
}

fn default_poll_interval_secs() -> u64 {
    5
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).context(ReadFileSnafu)?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that all required fields are present and non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.transfer.file_id.is_empty(), EmptyFileIdSnafu);
        ensure!(!self.staging.bucket_url.is_empty(), EmptyBucketUrlSnafu);
        ensure!(!self.staging.folder.is_empty(), EmptyFolderSnafu);
        ensure!(!self.warehouse.project.is_empty(), EmptyProjectSnafu);
        ensure!(
            !self.warehouse.dataset.is_empty() && !self.warehouse.table.is_empty(),
            EmptyTableNameSnafu
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
transfer:
  file_id: "1aBcD"

staging:
  bucket_url: "gs://my-bucket"
  folder: "tweets"

warehouse:
  project: "my-project"
  dataset: "tweets_dataset"
  table: "tweets"
  source_uri_prefix: "gs://my-bucket/tweets/"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.transfer.chunk_size, 4 * MB);
        assert_eq!(config.staging.archive_name, "archive.zip");
        assert_eq!(config.warehouse.mode, WriteMode::Create);
        assert_eq!(config.warehouse.poll_interval_secs, 5);
        assert!(config.warehouse.load_timeout_secs.is_none());
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
    }

    #[test]
    fn overwrite_mode_parses() {
        let yaml = MINIMAL.replace("table: \"tweets\"", "table: \"tweets\"\n  mode: overwrite");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.warehouse.mode, WriteMode::Overwrite);
    }

    #[test]
    fn empty_file_id_rejected() {
        let yaml = MINIMAL.replace("\"1aBcD\"", "\"\"");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyFileId));
    }

    #[test]
    fn empty_folder_rejected() {
        let yaml = MINIMAL.replace("folder: \"tweets\"", "folder: \"\"");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyFolder));
    }
}
