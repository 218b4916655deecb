//! Query execution and row normalization.

use serde_json::Value;
use tracing::{debug, error};

use crate::error::{ExecuteSnafu, QueryError, RowShapeSnafu};
use snafu::prelude::*;

use super::WarehouseClient;

/// Execute SQL and normalize each result row into a two-column tuple.
///
/// Every query routed through here must produce at least two columns; any
/// extra columns are ignored. An empty result set returns an empty vec.
pub async fn run_query(
    client: &dyn WarehouseClient,
    sql: &str,
) -> Result<Vec<(Value, Value)>, QueryError> {
    let rows = match client.query(sql).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Query failed: {}", e);
            return Err(e).context(ExecuteSnafu);
        }
    };

    if rows.is_empty() {
        debug!("Query returned no rows");
        return Ok(Vec::new());
    }

    rows.into_iter()
        .map(|row| {
            let got = row.len();
            let mut values = row.into_iter();
            match (values.next(), values.next()) {
                (Some(first), Some(second)) => Ok((first, second)),
                _ => RowShapeSnafu { got }.fail(),
            }
        })
        .collect()
}
