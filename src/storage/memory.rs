//! In-process memory storage backend.
//!
//! Backs hermetic tests and local development runs; nothing survives the
//! process.

use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use std::sync::Arc;

use crate::error::StorageError;

use super::{BackendConfig, StorageProvider};

/// In-memory storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Logical bucket name, used only for the canonical URL.
    pub name: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) fn construct_memory(config: MemoryConfig) -> Result<Self, StorageError> {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

        let mut canonical_url = format!("memory://{}", config.name);
        if let Some(key) = &config.key {
            canonical_url = format!("{canonical_url}/{key}");
        }

        Ok(Self::assemble(
            BackendConfig::Memory(config),
            object_store,
            canonical_url,
        ))
    }
}
