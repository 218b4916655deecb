//! sleet: an archive-to-warehouse loading pipeline.
//!
//! This library fetches a dataset from a file-sharing service, stages and
//! decompresses it in object storage, loads it into an analytical warehouse
//! table, and runs a fixed set of analytical queries against it.
//!
//! # Example
//!
//! ```ignore
//! use sleet::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let media = sleet::transfer::HttpMediaSource::new(&config.transfer.endpoint)?;
//!     let storage = std::sync::Arc::new(
//!         sleet::storage::StorageProvider::for_url(&config.staging.bucket_url).await?,
//!     );
//!     let warehouse = sleet::warehouse::RestWarehouse::new(&config.warehouse.project, None)?;
//!     let stats = run_pipeline(&config, &media, storage, &warehouse).await?;
//!     println!("Loaded {} bytes", stats.bytes_transferred);
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod stager;
pub mod storage;
pub mod transfer;
pub mod warehouse;

// Re-export main types
pub use config::Config;
pub use pipeline::{run_pipeline, PipelineStats};
pub use storage::{StorageProvider, StorageProviderRef};
