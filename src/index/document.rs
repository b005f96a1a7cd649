use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;
use crate::index::preprocess::preprocess_content;
use crate::records::Record;

/// The slice of a [`Record`] the engine indexes, plus its vector when an
/// embedder was active at insert time.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub long_summary: Option<String>,
    pub category: String,
    pub source: String,
    pub created_at: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl IndexedDocument {
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            summary: record.summary.clone(),
            long_summary: record.long_summary.clone(),
            category: record.category.clone(),
            source: record.source.clone(),
            created_at: record.created_at.clone(),
            embedding: None,
        }
    }

    pub fn to_record(&self) -> Record {
        Record {
            id: self.id.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            long_summary: self.long_summary.clone(),
            category: self.category.clone(),
            source: self.source.clone(),
            created_at: self.created_at.clone(),
        }
    }

    /// Text fed to the embedder: title plus the short summary, falling back
    /// to the long one.
    pub fn embedding_text(&self) -> Option<String> {
        let summary = self
            .summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.long_summary.as_deref())
            .unwrap_or_default();
        preprocess_content(&self.title, summary)
    }

    /// Attach a vector from `embedder`.
    ///
    /// A failed embedding leaves the document text-only; it stays searchable
    /// through the lexical path.
    pub fn with_embedding(mut self, embedder: &dyn Embedder) -> Self {
        let Some(text) = self.embedding_text() else {
            return self;
        };

        match embedder.embed(&text) {
            Ok(vector) => self.embedding = Some(vector),
            Err(err) => log::warn!("indexing {} without a vector: {err}", self.id),
        }
        self
    }
}

/// A record matched by a query, with its relevance score.
///
/// Scores are non-negative and only comparable within one result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub record: Record,
    pub score: f32,
}

impl SearchResult {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}
