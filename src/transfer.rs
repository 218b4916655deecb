//! Media transfer from the file-sharing service.
//!
//! Downloads a file by identifier into an in-memory buffer with a chunked
//! read loop, reporting a progress fraction after each chunk. Any failure
//! aborts the whole fetch; there is no retry and no partial result.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use snafu::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::emit;
use crate::error::{
    MediaRequestSnafu, MediaStatusSnafu, MissingLengthSnafu, ShortReadSnafu, TransferError,
};
use crate::metrics::events::{TransferCompleted, TransferProgress};

const TIMEOUT_SECONDS: u64 = 60;

/// Environment variable holding the bearer token for the media API.
///
/// Token acquisition is delegated to the host environment; sleet never runs
/// an authentication flow itself.
pub const MEDIA_TOKEN_VAR: &str = "GOOGLE_OAUTH_TOKEN";

/// Read access to a file-sharing service's media content.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Total size in bytes of the file's media content.
    async fn content_length(&self, file_id: &str) -> Result<u64, TransferError>;

    /// Read `len` bytes of media content starting at `offset`.
    async fn fetch_range(
        &self,
        file_id: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, TransferError>;
}

/// HTTP media source speaking a Drive-style `files/{id}?alt=media` API.
pub struct HttpMediaSource {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpMediaSource {
    /// Create a media source against the given API base URL.
    pub fn new(endpoint: &str) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .context(MediaRequestSnafu { file_id: "" })?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: std::env::var(MEDIA_TOKEN_VAR).ok(),
        })
    }

    fn media_url(&self, file_id: &str) -> String {
        format!("{}/files/{}?alt=media", self.endpoint, file_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn content_length(&self, file_id: &str) -> Result<u64, TransferError> {
        let response = self
            .authorize(self.http.head(self.media_url(file_id)))
            .send()
            .await
            .context(MediaRequestSnafu { file_id })?;

        ensure!(
            response.status().is_success(),
            MediaStatusSnafu {
                status: response.status().as_u16(),
                file_id,
            }
        );

        response
            .content_length()
            .context(MissingLengthSnafu { file_id })
    }

    async fn fetch_range(
        &self,
        file_id: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, TransferError> {
        let range = format!("bytes={}-{}", offset, offset + len - 1);
        let response = self
            .authorize(self.http.get(self.media_url(file_id)))
            .header(reqwest::header::RANGE, range)
            .send()
            .await
            .context(MediaRequestSnafu { file_id })?;

        ensure!(
            response.status().is_success(),
            MediaStatusSnafu {
                status: response.status().as_u16(),
                file_id,
            }
        );

        response.bytes().await.context(MediaRequestSnafu { file_id })
    }
}

/// Fetch a file's media content into memory, chunk by chunk.
///
/// Reports a progress fraction in `[0, 1]` after each chunk and returns the
/// fully assembled buffer. The buffer length always equals the sum of the
/// chunk sizes read.
pub async fn fetch(
    source: &dyn MediaSource,
    file_id: &str,
    chunk_size: usize,
) -> Result<Bytes, TransferError> {
    let start = Instant::now();
    let total = source.content_length(file_id).await?;
    debug!("Fetching file {} ({} bytes)", file_id, total);

    let mut buffer = BytesMut::with_capacity(total as usize);
    let mut offset = 0u64;

    while offset < total {
        let len = (chunk_size as u64).min(total - offset);
        let chunk = source.fetch_range(file_id, offset, len).await?;
        ensure!(!chunk.is_empty(), ShortReadSnafu { offset, file_id });

        offset += chunk.len() as u64;
        buffer.extend_from_slice(&chunk);

        let fraction = offset as f64 / total as f64;
        emit!(TransferProgress { fraction });
        debug!("Downloading {}%", (fraction * 100.0) as u32);
    }

    emit!(TransferCompleted {
        bytes: offset,
        duration: start.elapsed(),
    });
    info!("Fetched file {} ({} bytes)", file_id, offset);

    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Media source backed by a byte vector, recording each range request.
    struct FixtureSource {
        data: Vec<u8>,
        requests: Mutex<Vec<(u64, u64)>>,
    }

    impl FixtureSource {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaSource for FixtureSource {
        async fn content_length(&self, _file_id: &str) -> Result<u64, TransferError> {
            Ok(self.data.len() as u64)
        }

        async fn fetch_range(
            &self,
            _file_id: &str,
            offset: u64,
            len: u64,
        ) -> Result<Bytes, TransferError> {
            self.requests.lock().unwrap().push((offset, len));
            let end = ((offset + len) as usize).min(self.data.len());
            Ok(Bytes::copy_from_slice(&self.data[offset as usize..end]))
        }
    }

    #[tokio::test]
    async fn fetch_assembles_all_chunks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let source = FixtureSource::new(data.clone());

        let buffer = fetch(&source, "file-1", 4096).await.unwrap();

        assert_eq!(buffer.len(), data.len());
        assert_eq!(&buffer[..], &data[..]);

        // 10_000 bytes at 4096 per chunk is three requests, the last short.
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.as_slice(), &[(0, 4096), (4096, 4096), (8192, 1808)]);
    }

    #[tokio::test]
    async fn fetch_buffer_length_equals_chunk_sum() {
        let source = FixtureSource::new(vec![7u8; 1000]);
        let buffer = fetch(&source, "file-2", 333).await.unwrap();

        let requested: u64 = source
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, len)| len)
            .sum();
        assert_eq!(buffer.len() as u64, requested);
    }

    #[tokio::test]
    async fn fetch_empty_file_returns_empty_buffer() {
        let source = FixtureSource::new(Vec::new());
        let buffer = fetch(&source, "file-3", 1024).await.unwrap();
        assert!(buffer.is_empty());
        assert!(source.requests.lock().unwrap().is_empty());
    }

    /// Source that fails mid-download.
    struct FailingSource;

    #[async_trait]
    impl MediaSource for FailingSource {
        async fn content_length(&self, _file_id: &str) -> Result<u64, TransferError> {
            Ok(100)
        }

        async fn fetch_range(
            &self,
            file_id: &str,
            _offset: u64,
            _len: u64,
        ) -> Result<Bytes, TransferError> {
            MediaStatusSnafu {
                status: 500u16,
                file_id,
            }
            .fail()
        }
    }

    #[tokio::test]
    async fn fetch_aborts_on_chunk_error() {
        let err = fetch(&FailingSource, "file-4", 10).await.unwrap_err();
        assert!(matches!(err, TransferError::MediaStatus { status: 500, .. }));
    }
}
