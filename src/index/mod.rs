//! In-memory search index.
//!
//! Combines lexical scoring with optional cosine similarity over document
//! embeddings, fused by weighted reciprocal rank. The whole index serializes
//! to a single snapshot blob (see [`snapshot`]).

mod document;
mod engine;
pub mod hybrid;
pub mod lexical;
pub mod preprocess;
pub mod snapshot;
pub mod vector;

use crate::embeddings::EmbeddingError;
use crate::records::RecordStoreError;

pub use document::{IndexedDocument, SearchResult};
pub use engine::{EmbeddingSpec, EngineOptions, IndexEngine, DEFAULT_VECTOR_THRESHOLD};
pub use snapshot::SnapshotError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Zero-norm vector cannot be indexed")]
    ZeroNormVector,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Record store error: {0}")]
    Records(#[from] RecordStoreError),

    #[error("Index not initialized")]
    NotInitialized,

    #[error("Internal error: {0}")]
    Internal(String),
}
