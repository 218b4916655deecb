//! Object storage abstraction.
//!
//! Provides a unified interface for the staging bucket, with backends for
//! Google Cloud Storage, the local filesystem, and in-process memory
//! (the latter two for development and tests), selected by URL.

mod gcs;
mod local;
mod memory;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use memory::MemoryConfig;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

// URL patterns for the supported backends.
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$";
const MEMORY_URL: &str = r"^memory://(?P<name>[a-z0-9\-\._]+)(/(?P<key>.+))?$";
const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Backend {
    Gcs,
    Memory,
    Local,
}

fn matchers() -> &'static Vec<(Backend, Regex)> {
    static MATCHERS: OnceLock<Vec<(Backend, Regex)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        vec![
            (Backend::Gcs, Regex::new(GCS_URL).unwrap()),
            (Backend::Memory, Regex::new(MEMORY_URL).unwrap()),
            (Backend::Local, Regex::new(FILE_URI).unwrap()),
            (Backend::Local, Regex::new(FILE_PATH).unwrap()),
        ]
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Gcs(GcsConfig),
    Local(LocalConfig),
    Memory(MemoryConfig),
}

impl BackendConfig {
    /// Parse a bucket URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let matched = matchers()
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|caps| (*backend, caps)));

        match matched {
            Some((Backend::Gcs, caps)) => Ok(BackendConfig::Gcs(GcsConfig {
                bucket: caps["bucket"].to_string(),
                key: caps.name("key").map(|m| m.as_str().into()),
            })),
            Some((Backend::Memory, caps)) => Ok(BackendConfig::Memory(MemoryConfig {
                name: caps["name"].to_string(),
                key: caps.name("key").map(|m| m.as_str().into()),
            })),
            Some((Backend::Local, caps)) => {
                let path = caps["path"].to_string();
                let path = if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                };
                Ok(BackendConfig::Local(LocalConfig { path }))
            }
            None => InvalidUrlSnafu { url }.fail(),
        }
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Memory(memory) => memory.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

/// Storage provider that abstracts over the supported backends.
///
/// All paths passed to [`get`](Self::get), [`put`](Self::put),
/// [`exists`](Self::exists), and [`list_with_prefix`](Self::list_with_prefix)
/// are relative to the configured bucket URL (including any key prefix in it).
#[derive(Clone)]
pub struct StorageProvider {
    config: BackendConfig,
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given bucket URL.
    pub async fn for_url(url: &str) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::Gcs(config) => Self::construct_gcs(config),
            BackendConfig::Memory(config) => Self::construct_memory(config),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Check whether an object exists at the given path.
    pub async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let path = Path::from(path);
        let result = self.object_store.head(&self.qualify_path(&path)).await;

        match result {
            Ok(_) => {
                self.record(StorageOperation::Head, RequestStatus::Success);
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => {
                self.record(StorageOperation::Head, RequestStatus::Success);
                Ok(false)
            }
            Err(source) => {
                self.record(StorageOperation::Head, RequestStatus::Error);
                Err(StorageError::ObjectStore { source })
            }
        }
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(path);
        let result = self.object_store.get(&self.qualify_path(&path)).await;
        self.record_result(StorageOperation::Get, result.is_ok());

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Put an object, overwriting any existing object at the same path.
    pub async fn put(&self, path: &str, payload: Bytes) -> Result<(), StorageError> {
        let path = Path::from(path);
        let result = self
            .object_store
            .put(&self.qualify_path(&path), PutPayload::from(payload))
            .await;
        self.record_result(StorageOperation::Put, result.is_ok());

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// List object paths under a prefix, relative to the bucket URL.
    pub async fn list_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.record(StorageOperation::List, RequestStatus::Success);

        let full_prefix: Path = match self.config.key() {
            Some(key) => key.parts().chain(Path::from(prefix).parts()).collect(),
            None => Path::from(prefix),
        };
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let mut stream = self.object_store.list(Some(&full_prefix));
        let mut paths = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.context(ObjectStoreSnafu)?;
            // Strip the key prefix so callers get paths usable with get/put.
            let relative: Path = meta.location.parts().skip(key_part_count).collect();
            paths.push(relative.to_string());
        }

        paths.sort();
        debug!("Listed {} objects under {}", paths.len(), prefix);
        Ok(paths)
    }

    /// The canonical URL form of an object path, e.g. `gs://bucket/folder/name`.
    pub fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.canonical_url, path)
    }

    /// The canonical bucket URL this provider was constructed from.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Resolve an absolute object URI back to a provider-relative path.
    ///
    /// Returns `None` when the URI does not live under this provider's
    /// bucket URL.
    pub fn relative_from_url<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix(&self.canonical_url)
            .and_then(|rest| rest.strip_prefix('/'))
    }

    fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    fn record(&self, operation: StorageOperation, status: RequestStatus) {
        emit!(StorageRequest { operation, status });
    }

    fn record_result(&self, operation: StorageOperation, ok: bool) {
        let status = if ok {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        };
        self.record(operation, status);
    }

    pub(super) fn assemble(
        config: BackendConfig,
        object_store: Arc<dyn ObjectStore>,
        canonical_url: String,
    ) -> Self {
        Self {
            config,
            object_store,
            canonical_url,
        }
    }
}
