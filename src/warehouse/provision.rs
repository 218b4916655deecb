//! Dataset and table provisioning.
//!
//! "Absent" is the only condition that triggers creation; every other
//! failure propagates untouched.

use snafu::prelude::*;
use tracing::info;

use crate::error::{DatasetSnafu, ProvisionError, TableSnafu};

use super::{WarehouseClient, WriteMode};

/// Ensure the dataset exists, recreating it first in overwrite mode.
pub async fn ensure_dataset(
    client: &dyn WarehouseClient,
    dataset: &str,
    mode: WriteMode,
) -> Result<(), ProvisionError> {
    let exists = client
        .dataset_exists(dataset)
        .await
        .context(DatasetSnafu { dataset })?;

    if exists {
        match mode {
            WriteMode::Overwrite => {
                client
                    .delete_dataset(dataset)
                    .await
                    .context(DatasetSnafu { dataset })?;
                client
                    .create_dataset(dataset)
                    .await
                    .context(DatasetSnafu { dataset })?;
                info!("Dataset '{}' overwritten", dataset);
            }
            WriteMode::Create => {
                info!("Dataset '{}' already exists", dataset);
            }
        }
    } else {
        client
            .create_dataset(dataset)
            .await
            .context(DatasetSnafu { dataset })?;
        info!("Dataset '{}' created", dataset);
    }

    Ok(())
}

/// Ensure the table exists with an empty schema, recreating it first in
/// overwrite mode.
pub async fn ensure_table(
    client: &dyn WarehouseClient,
    dataset: &str,
    table: &str,
    mode: WriteMode,
) -> Result<(), ProvisionError> {
    let exists = client
        .table_exists(dataset, table)
        .await
        .context(TableSnafu { table })?;

    if exists {
        match mode {
            WriteMode::Overwrite => {
                client
                    .delete_table(dataset, table)
                    .await
                    .context(TableSnafu { table })?;
                client
                    .create_table(dataset, table)
                    .await
                    .context(TableSnafu { table })?;
                info!("Table '{}' overwritten", table);
            }
            WriteMode::Create => {
                info!("Table '{}' already exists", table);
            }
        }
    } else {
        client
            .create_table(dataset, table)
            .await
            .context(TableSnafu { table })?;
        info!("Table '{}' created", table);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageProvider;
    use crate::warehouse::MemoryWarehouse;
    use std::sync::Arc;

    async fn memory_client() -> MemoryWarehouse {
        let storage = Arc::new(StorageProvider::for_url("memory://staging").await.unwrap());
        MemoryWarehouse::new(storage)
    }

    #[tokio::test]
    async fn ensure_dataset_creates_when_absent() {
        let client = memory_client().await;
        assert!(!client.dataset_exists("ds").await.unwrap());

        ensure_dataset(&client, "ds", WriteMode::Create).await.unwrap();
        assert!(client.dataset_exists("ds").await.unwrap());
    }

    #[tokio::test]
    async fn ensure_dataset_is_noop_when_present_in_create_mode() {
        let client = memory_client().await;
        ensure_dataset(&client, "ds", WriteMode::Create).await.unwrap();
        ensure_table(&client, "ds", "t", WriteMode::Create).await.unwrap();

        ensure_dataset(&client, "ds", WriteMode::Create).await.unwrap();
        // Table survives: the dataset was not recreated.
        assert!(client.table_exists("ds", "t").await.unwrap());
    }

    #[tokio::test]
    async fn ensure_dataset_overwrite_drops_contents() {
        let client = memory_client().await;
        ensure_dataset(&client, "ds", WriteMode::Create).await.unwrap();
        ensure_table(&client, "ds", "t", WriteMode::Create).await.unwrap();

        ensure_dataset(&client, "ds", WriteMode::Overwrite).await.unwrap();
        assert!(client.dataset_exists("ds").await.unwrap());
        assert!(!client.table_exists("ds", "t").await.unwrap());
    }

    #[tokio::test]
    async fn ensure_table_overwrite_drops_rows() {
        let client = memory_client().await;
        ensure_dataset(&client, "ds", WriteMode::Create).await.unwrap();
        ensure_table(&client, "ds", "t", WriteMode::Create).await.unwrap();
        client.insert_rows("ds", "t", vec![serde_json::json!({"a": 1})]);
        assert_eq!(client.row_count("ds", "t"), Some(1));

        ensure_table(&client, "ds", "t", WriteMode::Overwrite).await.unwrap();
        assert_eq!(client.row_count("ds", "t"), Some(0));
    }
}
