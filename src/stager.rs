//! Staging of payloads and archives in the object store.
//!
//! The stager owns the folder layout under the staging bucket: a marker
//! object per folder, the uploaded archive blob, and one object per
//! extracted archive entry.

use bytes::Bytes;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::emit;
use crate::error::StorageError;
use crate::metrics::events::{ArchiveEntryExtracted, ArchiveExtractionCompleted};
use crate::storage::StorageProvider;

/// Name of the zero-byte object that marks a folder as present.
pub const FOLDER_MARKER: &str = ".folder";

/// Reference to a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Path relative to the bucket URL, e.g. `tweets/archive.zip`.
    pub path: String,
    /// Canonical URL, e.g. `gs://bucket/tweets/archive.zip`.
    pub url: String,
}

/// Result of an archive extraction attempt.
///
/// Extraction never fails through the error channel; callers branch on the
/// outcome instead. Only [`Extracted`](ExtractOutcome::Extracted) means an
/// object is ready for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Every entry was re-uploaded; `last_entry` names the final entry in
    /// listing order. Downstream stages load exactly that object, so
    /// archives are expected to carry a single data file.
    Extracted { last_entry: String, entries: usize },
    /// The staged object is not a ZIP archive.
    NotAnArchive { reason: String },
    /// Extraction started but could not complete.
    Failed { reason: String },
}

impl ExtractOutcome {
    /// The advertised entry name, when extraction succeeded.
    pub fn last_entry(&self) -> Option<&str> {
        match self {
            ExtractOutcome::Extracted { last_entry, .. } => Some(last_entry),
            _ => None,
        }
    }
}

/// Stager for the archive and its extracted entries.
pub struct Stager {
    storage: Arc<StorageProvider>,
}

impl Stager {
    pub fn new(storage: Arc<StorageProvider>) -> Self {
        Self { storage }
    }

    /// Ensure the folder marker object exists.
    ///
    /// Idempotent: a second call observes the marker and does nothing.
    pub async fn ensure_folder(&self, folder: &str) -> Result<(), StorageError> {
        let marker = format!("{folder}/{FOLDER_MARKER}");
        if self.storage.exists(&marker).await? {
            debug!("Folder {} already exists", folder);
            return Ok(());
        }

        self.storage.put(&marker, Bytes::new()).await?;
        info!("Created folder {}", self.storage.object_url(folder));
        Ok(())
    }

    /// Upload a payload under `folder/name`, overwriting any existing object.
    pub async fn upload_blob(
        &self,
        folder: &str,
        name: &str,
        payload: Bytes,
    ) -> Result<ObjectRef, StorageError> {
        let path = format!("{folder}/{name}");
        self.storage.put(&path, payload).await?;

        let url = self.storage.object_url(&path);
        info!("Uploaded {}", url);
        Ok(ObjectRef { path, url })
    }

    /// Download the staged ZIP object and re-upload each entry as an
    /// individual object under the same folder.
    ///
    /// Entries are processed in listing order; directories are skipped.
    pub async fn extract_archive(&self, folder: &str, archive_name: &str) -> ExtractOutcome {
        let start = Instant::now();
        let archive_path = format!("{folder}/{archive_name}");

        let payload = match self.storage.get(&archive_path).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not fetch archive {}: {}", archive_path, e);
                return ExtractOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let entries = match read_entries(&payload) {
            Ok(entries) => entries,
            Err(outcome) => {
                warn!(
                    "Extraction of {} aborted",
                    self.storage.object_url(&archive_path)
                );
                return outcome;
            }
        };

        if entries.is_empty() {
            return ExtractOutcome::Failed {
                reason: "archive contains no file entries".to_string(),
            };
        }

        let count = entries.len();
        let mut last_entry = String::new();
        for (name, content) in entries {
            let entry_path = format!("{folder}/{name}");
            emit!(ArchiveEntryExtracted {
                bytes: content.len() as u64
            });
            if let Err(e) = self.storage.put(&entry_path, content).await {
                warn!("Could not upload entry {}: {}", entry_path, e);
                return ExtractOutcome::Failed {
                    reason: e.to_string(),
                };
            }
            debug!("Extracted {}", self.storage.object_url(&entry_path));
            last_entry = name;
        }

        emit!(ArchiveExtractionCompleted {
            duration: start.elapsed(),
        });
        info!(
            "Extracted {} entries from {} (last: {})",
            count,
            self.storage.object_url(&archive_path),
            last_entry
        );

        ExtractOutcome::Extracted {
            last_entry,
            entries: count,
        }
    }
}

/// Read all file entries out of a ZIP payload, in listing order.
fn read_entries(payload: &Bytes) -> Result<Vec<(String, Bytes)>, ExtractOutcome> {
    let mut archive = match ZipArchive::new(Cursor::new(payload.as_ref())) {
        Ok(archive) => archive,
        Err(ZipError::InvalidArchive(message)) => {
            return Err(ExtractOutcome::NotAnArchive {
                reason: message.to_string(),
            })
        }
        Err(ZipError::UnsupportedArchive(message)) => {
            return Err(ExtractOutcome::NotAnArchive {
                reason: message.to_string(),
            })
        }
        Err(e) => {
            return Err(ExtractOutcome::Failed {
                reason: e.to_string(),
            })
        }
    };

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                return Err(ExtractOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        };
        if file.is_dir() {
            continue;
        }

        let mut content = Vec::with_capacity(file.size() as usize);
        if let Err(e) = file.read_to_end(&mut content) {
            return Err(ExtractOutcome::Failed {
                reason: e.to_string(),
            });
        }
        entries.push((file.name().to_string(), Bytes::from(content)));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    async fn memory_stager() -> (Stager, Arc<StorageProvider>) {
        let storage = Arc::new(StorageProvider::for_url("memory://staging").await.unwrap());
        (Stager::new(storage.clone()), storage)
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Bytes {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    #[tokio::test]
    async fn ensure_folder_is_idempotent() {
        let (stager, storage) = memory_stager().await;

        stager.ensure_folder("tweets").await.unwrap();
        stager.ensure_folder("tweets").await.unwrap();

        let markers = storage.list_with_prefix("tweets").await.unwrap();
        assert_eq!(markers, vec![format!("tweets/{FOLDER_MARKER}")]);
    }

    #[tokio::test]
    async fn upload_blob_roundtrips_and_overwrites() {
        let (stager, storage) = memory_stager().await;

        let blob = stager
            .upload_blob("tweets", "archive.zip", Bytes::from_static(b"first"))
            .await
            .unwrap();
        assert_eq!(blob.path, "tweets/archive.zip");
        assert_eq!(blob.url, "memory://staging/tweets/archive.zip");
        assert_eq!(&storage.get(&blob.path).await.unwrap()[..], b"first");

        stager
            .upload_blob("tweets", "archive.zip", Bytes::from_static(b"second"))
            .await
            .unwrap();
        assert_eq!(&storage.get(&blob.path).await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn extract_uploads_every_entry_but_advertises_the_last() {
        let (stager, storage) = memory_stager().await;
        let archive = zip_with(&[("a.json", b"{}\n"), ("b.json", b"{}\n")]);
        stager
            .upload_blob("tweets", "archive.zip", archive)
            .await
            .unwrap();

        let outcome = stager.extract_archive("tweets", "archive.zip").await;
        assert_eq!(
            outcome,
            ExtractOutcome::Extracted {
                last_entry: "b.json".to_string(),
                entries: 2,
            }
        );

        // Both entries exist as separate objects.
        assert!(storage.exists("tweets/a.json").await.unwrap());
        assert!(storage.exists("tweets/b.json").await.unwrap());
    }

    #[tokio::test]
    async fn extract_of_non_zip_reports_not_an_archive() {
        let (stager, _) = memory_stager().await;
        stager
            .upload_blob("tweets", "archive.zip", Bytes::from_static(b"not a zip"))
            .await
            .unwrap();

        let outcome = stager.extract_archive("tweets", "archive.zip").await;
        assert!(matches!(outcome, ExtractOutcome::NotAnArchive { .. }));
        assert_eq!(outcome.last_entry(), None);
    }

    #[tokio::test]
    async fn extract_of_missing_archive_reports_failed() {
        let (stager, _) = memory_stager().await;
        let outcome = stager.extract_archive("tweets", "nothing.zip").await;
        assert!(matches!(outcome, ExtractOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn extract_of_empty_archive_reports_failed() {
        let (stager, _) = memory_stager().await;
        stager
            .upload_blob("tweets", "archive.zip", zip_with(&[]))
            .await
            .unwrap();

        let outcome = stager.extract_archive("tweets", "archive.zip").await;
        assert!(matches!(outcome, ExtractOutcome::Failed { .. }));
    }
}
