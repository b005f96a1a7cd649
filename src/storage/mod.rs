//! Storage adapters for the serialized index snapshot.
//!
//! The index only ever sees an opaque blob under a logical key. Each
//! deployment target gets its own [`SnapshotStorage`] implementation:
//!
//! - [`LocalFileStorage`] - one file per key under a base directory
//! - [`RemoteRowStorage`] - one row per key in a table reachable through a
//!   database-style query endpoint
//! - [`MemoryStorage`] - process-local map, for tests and ephemeral runs
//!
//! Every failure is reported as a [`StorageError`]; the lifecycle manager
//! treats any of them as "snapshot unavailable".

mod local;
mod remote;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

pub use local::LocalFileStorage;
pub use remote::{
    HttpQueryClient, QueryClient, RemoteRowStorage, Row, DEFAULT_TABLE, DEFAULT_TIMEOUT_SECS,
};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("remote query failed: {0}")]
    Remote(String),

    #[error("stored snapshot is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Where the serialized index lives.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Removing a key that does not exist is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Snapshot storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStorage for MemoryStorage {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs().contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.blobs().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs().remove(key);
        Ok(())
    }
}
