//! REST implementation of the warehouse client.
//!
//! Speaks the BigQuery-v2-shaped API surface: dataset/table CRUD, job
//! insertion and polling for loads, and the synchronous query endpoint.
//! Authentication is delegated to the host environment; the bearer token is
//! read from `GOOGLE_OAUTH_TOKEN` and never refreshed here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;
use std::time::Duration;
use tracing::debug;

use crate::error::{
    ApiSnafu, DecodeSnafu, HttpSnafu, NotFoundSnafu, UnknownJobSnafu, WarehouseError,
};

use super::{JobId, JobState, LoadSpec, Row, WarehouseClient};

const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";
const TIMEOUT_SECONDS: u64 = 60;
const QUERY_POLL_MILLIS: u64 = 500;

/// Environment variable holding the bearer token for the warehouse API.
pub const TOKEN_VAR: &str = "GOOGLE_OAUTH_TOKEN";

/// Project-scoped REST warehouse client.
pub struct RestWarehouse {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    token: Option<String>,
}

impl RestWarehouse {
    /// Create a client for the given project, optionally against a
    /// non-default endpoint (emulators, private deployments).
    pub fn new(project: &str, endpoint: Option<&str>) -> Result<Self, WarehouseError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .context(HttpSnafu)?;

        Ok(Self {
            http,
            endpoint: endpoint
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            project: project.to_string(),
            token: std::env::var(TOKEN_VAR).ok(),
        })
    }

    fn dataset_url(&self, dataset: &str) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            self.endpoint, self.project, dataset
        )
    }

    fn datasets_url(&self) -> String {
        format!("{}/projects/{}/datasets", self.endpoint, self.project)
    }

    fn table_url(&self, dataset: &str, table: &str) -> String {
        format!("{}/tables/{}", self.dataset_url(dataset), table)
    }

    fn tables_url(&self, dataset: &str) -> String {
        format!("{}/tables", self.dataset_url(dataset))
    }

    fn jobs_url(&self) -> String {
        format!("{}/projects/{}/jobs", self.endpoint, self.project)
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.jobs_url(), job_id)
    }

    fn queries_url(&self) -> String {
        format!("{}/projects/{}/queries", self.endpoint, self.project)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<reqwest::Response, WarehouseError> {
        let response = self.authorize(request).send().await.context(HttpSnafu)?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return NotFoundSnafu { resource }.fail();
        }
        if !status.is_success() {
            let message = api_error_message(response).await;
            return ApiSnafu {
                status: status.as_u16(),
                message,
            }
            .fail();
        }

        Ok(response)
    }

    /// Probe a resource URL, mapping 404 to `false`.
    async fn resource_exists(&self, url: String, resource: &str) -> Result<bool, WarehouseError> {
        match self.send(self.http.get(url), resource).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Best-effort extraction of the error message from an API error body.
async fn api_error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<ApiErrorBody>(&body)
        .map(|parsed| parsed.error.message)
        .unwrap_or(body)
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetBody {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    project_id: String,
    dataset_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableBody {
    table_reference: TableReference,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    configuration: JobConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobConfiguration {
    load: LoadConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration {
    source_uris: Vec<String>,
    destination_table: TableReference,
    source_format: String,
    autodetect: bool,
    ignore_unknown_values: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    job_reference: Option<JobReference>,
    status: Option<JobStatusBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusBody {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequestBody {
    query: String,
    use_legacy_sql: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponseBody {
    job_complete: Option<bool>,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<RowBody>,
}

#[derive(Debug, Deserialize)]
struct RowBody {
    #[serde(default)]
    f: Vec<CellBody>,
}

#[derive(Debug, Deserialize)]
struct CellBody {
    #[serde(default)]
    v: Value,
}

fn rows_from_body(rows: Vec<RowBody>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| row.f.into_iter().map(|cell| cell.v).collect())
        .collect()
}

#[async_trait]
impl WarehouseClient for RestWarehouse {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool, WarehouseError> {
        self.resource_exists(self.dataset_url(dataset), dataset).await
    }

    async fn create_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        let body = DatasetBody {
            dataset_reference: DatasetReference {
                project_id: self.project.clone(),
                dataset_id: dataset.to_string(),
            },
        };
        self.send(self.http.post(self.datasets_url()).json(&body), dataset)
            .await?;
        debug!("Created dataset {}", dataset);
        Ok(())
    }

    async fn delete_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        let url = format!("{}?deleteContents=true", self.dataset_url(dataset));
        self.send(self.http.delete(url), dataset).await?;
        Ok(())
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool, WarehouseError> {
        self.resource_exists(self.table_url(dataset, table), table)
            .await
    }

    async fn create_table(&self, dataset: &str, table: &str) -> Result<(), WarehouseError> {
        // No schema in the body: the warehouse infers it on first load.
        let body = TableBody {
            table_reference: TableReference {
                project_id: self.project.clone(),
                dataset_id: dataset.to_string(),
                table_id: table.to_string(),
            },
        };
        self.send(self.http.post(self.tables_url(dataset)).json(&body), table)
            .await?;
        debug!("Created table {}.{}", dataset, table);
        Ok(())
    }

    async fn delete_table(&self, dataset: &str, table: &str) -> Result<(), WarehouseError> {
        self.send(self.http.delete(self.table_url(dataset, table)), table)
            .await?;
        Ok(())
    }

    async fn begin_load(&self, spec: &LoadSpec) -> Result<JobId, WarehouseError> {
        let body = JobBody {
            configuration: JobConfiguration {
                load: LoadConfiguration {
                    source_uris: vec![spec.source_uri.clone()],
                    destination_table: TableReference {
                        project_id: self.project.clone(),
                        dataset_id: spec.dataset.clone(),
                        table_id: spec.table.clone(),
                    },
                    source_format: spec.source_format.as_str().to_string(),
                    autodetect: spec.autodetect,
                    ignore_unknown_values: spec.ignore_unknown_values,
                },
            },
        };

        let response = self
            .send(self.http.post(self.jobs_url()).json(&body), "job")
            .await?
            .json::<JobResponse>()
            .await
            .context(DecodeSnafu)?;

        let job_id = response
            .job_reference
            .map(|reference| reference.job_id)
            .context(UnknownJobSnafu { job_id: "" })?;
        Ok(JobId(job_id))
    }

    async fn job_state(&self, job: &JobId) -> Result<JobState, WarehouseError> {
        let response = self
            .send(self.http.get(self.job_url(&job.0)), &job.0)
            .await?
            .json::<JobResponse>()
            .await
            .context(DecodeSnafu)?;

        let status = response
            .status
            .context(UnknownJobSnafu { job_id: job.0.as_str() })?;
        Ok(match (status.state.as_str(), status.error_result) {
            ("DONE", Some(error)) => JobState::Failed {
                message: error.message,
            },
            ("DONE", None) => JobState::Done,
            ("RUNNING", _) => JobState::Running,
            _ => JobState::Pending,
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let body = QueryRequestBody {
            query: sql.to_string(),
            use_legacy_sql: false,
        };
        let mut response = self
            .send(self.http.post(self.queries_url()).json(&body), "query")
            .await?
            .json::<QueryResponseBody>()
            .await
            .context(DecodeSnafu)?;

        // Long-running queries return jobComplete=false; poll the query job
        // until the results are in.
        while !response.job_complete.unwrap_or(true) {
            let job_id = response
                .job_reference
                .as_ref()
                .map(|reference| reference.job_id.clone())
                .context(UnknownJobSnafu { job_id: "" })?;
            debug!("Query job {} still running", job_id);
            tokio::time::sleep(Duration::from_millis(QUERY_POLL_MILLIS)).await;

            let url = format!("{}/{}", self.queries_url(), job_id);
            response = self
                .send(self.http.get(url), "query")
                .await?
                .json::<QueryResponseBody>()
                .await
                .context(DecodeSnafu)?;
        }

        // TODO: follow pageToken for result sets larger than one page.
        Ok(rows_from_body(response.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_body_serializes_with_camel_case_keys() {
        let body = JobBody {
            configuration: JobConfiguration {
                load: LoadConfiguration {
                    source_uris: vec!["gs://b/tweets/x.json".to_string()],
                    destination_table: TableReference {
                        project_id: "p".to_string(),
                        dataset_id: "d".to_string(),
                        table_id: "t".to_string(),
                    },
                    source_format: "NEWLINE_DELIMITED_JSON".to_string(),
                    autodetect: true,
                    ignore_unknown_values: true,
                },
            },
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "configuration": {
                    "load": {
                        "sourceUris": ["gs://b/tweets/x.json"],
                        "destinationTable": {
                            "projectId": "p",
                            "datasetId": "d",
                            "tableId": "t"
                        },
                        "sourceFormat": "NEWLINE_DELIMITED_JSON",
                        "autodetect": true,
                        "ignoreUnknownValues": true
                    }
                }
            })
        );
    }

    #[test]
    fn query_rows_flatten_to_positional_values() {
        let body: QueryResponseBody = serde_json::from_value(json!({
            "jobComplete": true,
            "rows": [
                {"f": [{"v": "2021-02-12"}, {"v": "alice"}]},
                {"f": [{"v": "2021-02-11"}, {"v": "bob"}]}
            ]
        }))
        .unwrap();

        let rows = rows_from_body(body.rows);
        assert_eq!(
            rows,
            vec![
                vec![json!("2021-02-12"), json!("alice")],
                vec![json!("2021-02-11"), json!("bob")]
            ]
        );
    }

    #[test]
    fn job_failure_state_maps_to_failed() {
        let response: JobResponse = serde_json::from_value(json!({
            "jobReference": {"jobId": "j1"},
            "status": {"state": "DONE", "errorResult": {"message": "boom"}}
        }))
        .unwrap();

        let status = response.status.unwrap();
        assert_eq!(status.state, "DONE");
        assert_eq!(status.error_result.unwrap().message, "boom");
    }
}
