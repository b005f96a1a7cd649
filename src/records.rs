//! Content records and the record-store seam.
//!
//! The search index never owns records. It reads them through
//! [`RecordStore::all_records`] when rebuilding and when falling back to a
//! plain substring scan.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A searchable content item as provided by the record store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// URL-shaped primary key
    #[serde(alias = "url")]
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(
        default,
        alias = "longSummary",
        alias = "detailed_summary",
        skip_serializing_if = "Option::is_none"
    )]
    pub long_summary: Option<String>,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub source: String,

    /// ISO-8601 creation timestamp
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Lower-cased title + summaries, used by the substring fallback.
    pub fn haystack(&self) -> String {
        let mut text = self.title.to_lowercase();
        for part in [&self.summary, &self.long_summary].into_iter().flatten() {
            text.push(' ');
            text.push_str(&part.to_lowercase());
        }
        text
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RecordStoreError {
    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("malformed json records: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed csv records: {0}")]
    Csv(#[from] csv::Error),

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Source of truth for content records.
///
/// Must be safe to call repeatedly; each call returns whatever the store
/// holds at that moment.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn all_records(&self) -> Result<Vec<Record>, RecordStoreError>;
}

/// Record store held entirely in memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryRecordStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn push(&self, record: Record) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    pub fn replace(&self, records: Vec<Record>) {
        *self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = records;
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn all_records(&self) -> Result<Vec<Record>, RecordStoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

/// Record store backed by an exported JSON array or CSV file.
///
/// The file is re-read on every call, so an exporter can replace it while
/// the process is running.
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_csv(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn all_records(&self) -> Result<Vec<Record>, RecordStoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("records file {:?} does not exist", self.path);
                return Ok(vec![]);
            }
            Err(err) => return Err(err.into()),
        };

        if self.is_csv() {
            let mut reader = csv::Reader::from_reader(data.as_slice());
            let records = reader
                .deserialize::<Record>()
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(records);
        }

        Ok(serde_json::from_slice(&data)?)
    }
}
