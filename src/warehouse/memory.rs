//! In-process warehouse backend.
//!
//! Backs hermetic tests and local development runs: datasets and tables are
//! maps, load jobs read newline-delimited JSON from a shared
//! [`StorageProvider`], and queries are answered natively for the shapes the
//! analytics module produces (plus a two-literal `SELECT`).

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use crate::analytics::EMOJI_PATTERN;
use crate::error::{NotFoundSnafu, UnknownJobSnafu, UnsupportedQuerySnafu, WarehouseError};
use crate::storage::StorageProvider;
use snafu::prelude::*;

use super::{JobId, JobState, LoadSpec, Row, WarehouseClient};

const TOP_LIMIT: usize = 10;

/// In-process warehouse over an in-process object store.
pub struct MemoryWarehouse {
    storage: Arc<StorageProvider>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// dataset -> table -> rows
    datasets: HashMap<String, HashMap<String, Vec<Value>>>,
    jobs: HashMap<String, JobState>,
    next_job: u64,
}

impl MemoryWarehouse {
    /// Create a warehouse resolving load source URIs against `storage`.
    pub fn new(storage: Arc<StorageProvider>) -> Self {
        Self {
            storage,
            state: Mutex::new(State::default()),
        }
    }

    /// Append rows directly to a table (test and fixture helper).
    pub fn insert_rows(&self, dataset: &str, table: &str, rows: Vec<Value>) {
        let mut state = self.state.lock().unwrap();
        state
            .datasets
            .entry(dataset.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Number of rows in a table, if it exists.
    pub fn row_count(&self, dataset: &str, table: &str) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state
            .datasets
            .get(dataset)
            .and_then(|tables| tables.get(table))
            .map(Vec::len)
    }

    /// Load newline-delimited JSON from the shared storage into a table.
    ///
    /// Any failure becomes the job's terminal state rather than a submission
    /// error, matching how the real service reports load problems.
    async fn run_load(&self, spec: &LoadSpec) -> JobState {
        let Some(path) = self.storage.relative_from_url(&spec.source_uri) else {
            return JobState::Failed {
                message: format!("source URI outside the staging bucket: {}", spec.source_uri),
            };
        };

        let payload = match self.storage.get(path).await {
            Ok(payload) => payload,
            Err(e) => {
                return JobState::Failed {
                    message: format!("could not read {}: {e}", spec.source_uri),
                }
            }
        };

        let text = match std::str::from_utf8(&payload) {
            Ok(text) => text,
            Err(e) => {
                return JobState::Failed {
                    message: format!("source is not UTF-8: {e}"),
                }
            }
        };

        let mut rows = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    return JobState::Failed {
                        message: format!("invalid JSON on line {}: {e}", number + 1),
                    }
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        let Some(tables) = state.datasets.get_mut(&spec.dataset) else {
            return JobState::Failed {
                message: format!("dataset {} does not exist", spec.dataset),
            };
        };
        let Some(table) = tables.get_mut(&spec.table) else {
            return JobState::Failed {
                message: format!("table {}.{} does not exist", spec.dataset, spec.table),
            };
        };

        debug!(
            "Loaded {} rows into {}.{}",
            rows.len(),
            spec.dataset,
            spec.table
        );
        table.extend(rows);
        JobState::Done
    }

    /// Rows of the table a query's `FROM dataset.table` clause points at.
    fn table_rows(&self, sql: &str) -> Result<Vec<Value>, WarehouseError> {
        static FROM_CLAUSE: OnceLock<Regex> = OnceLock::new();
        let regex = FROM_CLAUSE.get_or_init(|| {
            Regex::new(r"(?i)from\s+([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)").unwrap()
        });

        let captures = regex.captures(sql).context(UnsupportedQuerySnafu {
            message: "query has no dataset.table reference",
        })?;
        let (dataset, table) = (&captures[1], &captures[2]);

        let state = self.state.lock().unwrap();
        state
            .datasets
            .get(dataset)
            .and_then(|tables| tables.get(table))
            .cloned()
            .context(NotFoundSnafu {
                resource: format!("{dataset}.{table}"),
            })
    }
}

#[async_trait]
impl WarehouseClient for MemoryWarehouse {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool, WarehouseError> {
        Ok(self.state.lock().unwrap().datasets.contains_key(dataset))
    }

    async fn create_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        self.state
            .lock()
            .unwrap()
            .datasets
            .entry(dataset.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        self.state
            .lock()
            .unwrap()
            .datasets
            .remove(dataset)
            .map(|_| ())
            .context(NotFoundSnafu { resource: dataset })
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool, WarehouseError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .datasets
            .get(dataset)
            .is_some_and(|tables| tables.contains_key(table)))
    }

    async fn create_table(&self, dataset: &str, table: &str) -> Result<(), WarehouseError> {
        let mut state = self.state.lock().unwrap();
        let tables = state
            .datasets
            .get_mut(dataset)
            .context(NotFoundSnafu { resource: dataset })?;
        tables.insert(table.to_string(), Vec::new());
        Ok(())
    }

    async fn delete_table(&self, dataset: &str, table: &str) -> Result<(), WarehouseError> {
        let mut state = self.state.lock().unwrap();
        let tables = state
            .datasets
            .get_mut(dataset)
            .context(NotFoundSnafu { resource: dataset })?;
        tables
            .remove(table)
            .map(|_| ())
            .context(NotFoundSnafu { resource: table })
    }

    async fn begin_load(&self, spec: &LoadSpec) -> Result<JobId, WarehouseError> {
        let outcome = self.run_load(spec).await;

        let mut state = self.state.lock().unwrap();
        state.next_job += 1;
        let job_id = format!("job-{}", state.next_job);
        state.jobs.insert(job_id.clone(), outcome);
        Ok(JobId(job_id))
    }

    async fn job_state(&self, job: &JobId) -> Result<JobState, WarehouseError> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .get(&job.0)
            .cloned()
            .context(UnknownJobSnafu { job_id: job.0.as_str() })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        if let Some(row) = literal_select(sql) {
            return Ok(vec![row]);
        }

        let rows = self.table_rows(sql)?;
        if sql.contains("REGEXP_EXTRACT_ALL") {
            Ok(top_emoji(&rows))
        } else if sql.contains("UNNEST(mentionedUsers)") {
            Ok(top_mentioned(&rows))
        } else if sql.contains("user_rank") {
            Ok(busiest_day_top_user(&rows))
        } else {
            UnsupportedQuerySnafu {
                message: format!("unrecognized query shape: {}", sql.trim()),
            }
            .fail()
        }
    }
}

/// Answer `SELECT <int>, '<string>'`.
fn literal_select(sql: &str) -> Option<Row> {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    let regex = LITERAL.get_or_init(|| {
        Regex::new(r"(?i)^\s*SELECT\s+(-?\d+)\s*,\s*'([^']*)'\s*$").unwrap()
    });

    let captures = regex.captures(sql)?;
    let number: i64 = captures[1].parse().ok()?;
    Some(vec![json!(number), json!(captures[2].to_string())])
}

fn date_of(row: &Value) -> Option<&str> {
    let date = row.get("date")?.as_str()?;
    (date.len() >= 10).then(|| &date[..10])
}

fn username_of(row: &Value) -> Option<&str> {
    row.get("user")?.get("username")?.as_str()
}

/// Top dates by post count; for each, the user with the most posts that day.
fn busiest_day_top_user(rows: &[Value]) -> Vec<Row> {
    let mut per_date: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        if let Some(date) = date_of(row) {
            *per_date.entry(date).or_default() += 1;
        }
    }

    let mut dates: Vec<(&str, usize)> = per_date.into_iter().collect();
    dates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    dates.truncate(TOP_LIMIT);

    dates
        .into_iter()
        .filter_map(|(date, _)| {
            let mut per_user: HashMap<&str, usize> = HashMap::new();
            for row in rows {
                if date_of(row) == Some(date) {
                    if let Some(username) = username_of(row) {
                        *per_user.entry(username).or_default() += 1;
                    }
                }
            }
            let (username, _) = per_user
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))?;
            Some(vec![json!(date), json!(username)])
        })
        .collect()
}

/// Top emoji by occurrence count across post content.
fn top_emoji(rows: &[Value]) -> Vec<Row> {
    static EMOJI: OnceLock<Regex> = OnceLock::new();
    let regex = EMOJI.get_or_init(|| Regex::new(EMOJI_PATTERN).unwrap());

    let mut counts: HashMap<String, u64> = HashMap::new();
    for row in rows {
        let Some(content) = row.get("content").and_then(Value::as_str) else {
            continue;
        };
        for found in regex.find_iter(content) {
            *counts.entry(found.as_str().to_string()).or_default() += 1;
        }
    }

    ranked(counts)
}

/// Top mentioned usernames across all posts.
fn top_mentioned(rows: &[Value]) -> Vec<Row> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for row in rows {
        let Some(mentioned) = row.get("mentionedUsers").and_then(Value::as_array) else {
            continue;
        };
        for user in mentioned {
            let username = user
                .as_str()
                .or_else(|| user.get("username").and_then(Value::as_str));
            if let Some(username) = username {
                *counts.entry(username.to_string()).or_default() += 1;
            }
        }
    }

    ranked(counts)
}

/// Order a count map descending and keep the top entries.
fn ranked(counts: HashMap<String, u64>) -> Vec<Row> {
    let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.truncate(TOP_LIMIT);
    entries
        .into_iter()
        .map(|(key, count)| vec![json!(key), json!(count)])
        .collect()
}
