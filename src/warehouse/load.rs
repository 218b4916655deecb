//! Load job submission and synchronous completion wait.

use snafu::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::emit;
use crate::error::{JobFailedSnafu, LoadError, PollSnafu, SubmitSnafu, TimeoutSnafu};
use crate::metrics::events::LoadJobCompleted;

use super::{JobId, JobState, LoadSpec, SourceFormat, WarehouseClient};

/// Polling behavior for [`load_from_object_uri`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Delay between job state polls.
    pub poll_interval: Duration,
    /// Give up after this long without a terminal state.
    pub timeout: Option<Duration>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: None,
        }
    }
}

/// Load a newline-delimited-JSON object into a table and wait for the job
/// to finish.
///
/// The source URI is `source_uri_prefix` with `object_name` appended
/// verbatim — no separator is inserted, so the prefix must already end with
/// one. Schema auto-detection and unknown-field tolerance are always on.
pub async fn load_from_object_uri(
    client: &dyn WarehouseClient,
    source_uri_prefix: &str,
    dataset: &str,
    table: &str,
    object_name: &str,
    options: &LoadOptions,
) -> Result<JobId, LoadError> {
    let spec = LoadSpec {
        source_uri: format!("{source_uri_prefix}{object_name}"),
        dataset: dataset.to_string(),
        table: table.to_string(),
        source_format: SourceFormat::NewlineDelimitedJson,
        autodetect: true,
        ignore_unknown_values: true,
    };

    info!(
        "Loading {} into {}.{}",
        spec.source_uri, spec.dataset, spec.table
    );
    let started = Instant::now();
    let job = client.begin_load(&spec).await.context(SubmitSnafu)?;

    loop {
        match client.job_state(&job).await.context(PollSnafu)? {
            JobState::Done => {
                emit!(LoadJobCompleted {
                    duration: started.elapsed(),
                });
                info!("Load job {} finished", job);
                return Ok(job);
            }
            JobState::Failed { message } => {
                return JobFailedSnafu { message }.fail();
            }
            state @ (JobState::Pending | JobState::Running) => {
                if let Some(timeout) = options.timeout {
                    ensure!(
                        started.elapsed() <= timeout,
                        TimeoutSnafu {
                            seconds: timeout.as_secs(),
                        }
                    );
                }
                debug!("Load job {} is {:?}, waiting", job, state);
                tokio::time::sleep(options.poll_interval).await;
            }
        }
    }
}
