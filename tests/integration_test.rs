//! Integration tests for sleet

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::FileOptions;
use zip::ZipWriter;

use sleet::analytics;
use sleet::config::Config;
use sleet::error::{PipelineError, TransferError};
use sleet::storage::StorageProvider;
use sleet::transfer::MediaSource;
use sleet::warehouse::{run_query, MemoryWarehouse};
use sleet::{run_pipeline, StorageProviderRef};

mod config_tests {
    use super::*;
    use sleet::warehouse::WriteMode;

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
transfer:
  file_id: "1aBcDeFgH"
  chunk_size: 1048576

staging:
  bucket_url: "gs://challenge-bucket"
  folder: "tweets"
  archive_name: "tweets.zip"

warehouse:
  project: "challenge-project"
  dataset: "tweets_dataset"
  table: "tweets"
  mode: overwrite
  source_uri_prefix: "gs://challenge-bucket/tweets/"
  poll_interval_secs: 2
  load_timeout_secs: 600

metrics:
  enabled: false
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.transfer.file_id, "1aBcDeFgH");
        assert_eq!(config.transfer.chunk_size, 1048576);
        assert_eq!(config.staging.bucket_url, "gs://challenge-bucket");
        assert_eq!(config.staging.archive_name, "tweets.zip");
        assert_eq!(config.warehouse.mode, WriteMode::Overwrite);
        assert_eq!(config.warehouse.poll_interval_secs, 2);
        assert_eq!(config.warehouse.load_timeout_secs, Some(600));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_defaults() {
        let yaml = r#"
transfer:
  file_id: "1aBcDeFgH"

staging:
  bucket_url: "memory://staging"
  folder: "tweets"

warehouse:
  project: "p"
  dataset: "d"
  table: "t"
  source_uri_prefix: "memory://staging/tweets/"
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.staging.archive_name, "archive.zip");
        assert_eq!(config.warehouse.mode, WriteMode::Create);
        assert!(config.metrics.enabled);
    }
}

/// Media source backed by an in-memory byte buffer.
struct FixtureMedia {
    data: Vec<u8>,
}

#[async_trait]
impl MediaSource for FixtureMedia {
    async fn content_length(&self, _file_id: &str) -> Result<u64, TransferError> {
        Ok(self.data.len() as u64)
    }

    async fn fetch_range(
        &self,
        _file_id: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, TransferError> {
        let end = ((offset + len) as usize).min(self.data.len());
        Ok(Bytes::copy_from_slice(&self.data[offset as usize..end]))
    }
}

fn post(date: &str, username: &str, content: &str, mentions: &[&str]) -> serde_json::Value {
    json!({
        "date": date,
        "user": {"username": username},
        "content": content,
        "mentionedUsers": mentions
            .iter()
            .map(|name| json!({"username": name}))
            .collect::<Vec<_>>(),
    })
}

/// A single-entry ZIP holding the posts as newline-delimited JSON.
fn tweets_archive(entry_name: &str, posts: &[serde_json::Value]) -> Vec<u8> {
    let ndjson = posts
        .iter()
        .map(|row| row.to_string())
        .collect::<Vec<_>>()
        .join("\n");

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry_name, FileOptions::default())
        .unwrap();
    writer.write_all(ndjson.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

fn fixture_posts() -> Vec<serde_json::Value> {
    vec![
        // 2021-02-12 is the busiest date: 3 posts by alice, 2 by bob.
        post("2021-02-12T08:00:00+00:00", "alice", "good morning 😀", &["dave"]),
        post("2021-02-12T09:00:00+00:00", "alice", "still here 😀", &["dave"]),
        post("2021-02-12T10:00:00+00:00", "alice", "and again 😀", &[]),
        post("2021-02-12T11:00:00+00:00", "bob", "launching 🚀", &["erin"]),
        post("2021-02-12T12:00:00+00:00", "bob", "done", &[]),
        post("2021-02-11T09:00:00+00:00", "carol", "quiet day", &[]),
    ]
}

fn pipeline_config(mode: &str) -> Config {
    let yaml = format!(
        r#"
transfer:
  file_id: "fixture-file"
  chunk_size: 128

staging:
  bucket_url: "memory://staging"
  folder: "tweets"
  archive_name: "tweets.zip"

warehouse:
  project: "test-project"
  dataset: "tweets_dataset"
  table: "tweets"
  mode: {mode}
  source_uri_prefix: "memory://staging/tweets/"
  poll_interval_secs: 1

metrics:
  enabled: false
"#
    );
    Config::from_yaml(&yaml).unwrap()
}

async fn memory_backends() -> (StorageProviderRef, MemoryWarehouse) {
    let storage = Arc::new(StorageProvider::for_url("memory://staging").await.unwrap());
    let warehouse = MemoryWarehouse::new(storage.clone());
    (storage, warehouse)
}

#[tokio::test]
async fn end_to_end_pipeline_and_analytics() {
    let config = pipeline_config("create");
    let archive = tweets_archive("tweets.json", &fixture_posts());
    let media = FixtureMedia {
        data: archive.clone(),
    };
    let (storage, warehouse) = memory_backends().await;

    let stats = run_pipeline(&config, &media, storage.clone(), &warehouse)
        .await
        .unwrap();

    assert_eq!(stats.bytes_transferred, archive.len());
    assert_eq!(stats.entries_extracted, 1);
    assert_eq!(stats.objects_uploaded, 2); // archive blob + one entry
    assert_eq!(stats.load_jobs_completed, 1);

    // The folder marker, the archive, and the extracted entry all exist.
    assert!(storage.exists("tweets/.folder").await.unwrap());
    assert!(storage.exists("tweets/tweets.zip").await.unwrap());
    assert!(storage.exists("tweets/tweets.json").await.unwrap());

    assert_eq!(warehouse.row_count("tweets_dataset", "tweets"), Some(6));

    let report = analytics::run_analytics(&warehouse, "tweets_dataset", "tweets")
        .await
        .unwrap();

    // The single busiest date belongs to alice.
    assert_eq!(
        report.busiest_day_top_user[0],
        (json!("2021-02-12"), json!("alice"))
    );
    assert_eq!(
        report.busiest_day_top_user[1],
        (json!("2021-02-11"), json!("carol"))
    );

    // Grinning face appears three times, rocket once.
    assert_eq!(report.top_emoji[0], (json!("😀"), json!(3)));
    assert_eq!(report.top_emoji[1], (json!("🚀"), json!(1)));

    assert_eq!(report.top_mentioned_users[0], (json!("dave"), json!(2)));
    assert_eq!(report.top_mentioned_users[1], (json!("erin"), json!(1)));
}

#[tokio::test]
async fn literal_select_roundtrip() {
    let (_storage, warehouse) = memory_backends().await;
    let rows = run_query(&warehouse, "SELECT 1, 'x'").await.unwrap();
    assert_eq!(rows, vec![(json!(1), json!("x"))]);
}

#[tokio::test]
async fn non_zip_archive_aborts_the_pipeline() {
    let config = pipeline_config("create");
    let media = FixtureMedia {
        data: b"this is not a zip archive".to_vec(),
    };
    let (storage, warehouse) = memory_backends().await;

    let err = run_pipeline(&config, &media, storage.clone(), &warehouse)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Archive { .. }));

    // The broken archive was still staged before extraction failed.
    assert!(storage.exists("tweets/tweets.zip").await.unwrap());
}

#[tokio::test]
async fn overwrite_mode_resets_the_table_between_runs() {
    let archive = tweets_archive("tweets.json", &fixture_posts());
    let media = FixtureMedia { data: archive };
    let (storage, warehouse) = memory_backends().await;

    let config = pipeline_config("overwrite");
    run_pipeline(&config, &media, storage.clone(), &warehouse)
        .await
        .unwrap();
    run_pipeline(&config, &media, storage.clone(), &warehouse)
        .await
        .unwrap();

    // The second run recreated the table, so rows are not duplicated.
    assert_eq!(warehouse.row_count("tweets_dataset", "tweets"), Some(6));
}

#[tokio::test]
async fn create_mode_appends_between_runs() {
    let archive = tweets_archive("tweets.json", &fixture_posts());
    let media = FixtureMedia { data: archive };
    let (storage, warehouse) = memory_backends().await;

    let config = pipeline_config("create");
    run_pipeline(&config, &media, storage.clone(), &warehouse)
        .await
        .unwrap();
    run_pipeline(&config, &media, storage.clone(), &warehouse)
        .await
        .unwrap();

    assert_eq!(warehouse.row_count("tweets_dataset", "tweets"), Some(12));
}
