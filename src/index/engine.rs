use std::collections::HashMap;

use crate::embeddings::Embedder;
use crate::index::hybrid::{rrf_fusion, DEFAULT_SEMANTIC_WEIGHT};
use crate::index::lexical::score_lexical;
use crate::index::snapshot::{self, SnapshotError, SnapshotHeader};
use crate::index::vector::{self, validate_embedding};
use crate::index::{IndexError, IndexedDocument, SearchResult};
use crate::records::Record;

/// Default minimum cosine similarity for the semantic half of a hybrid query.
pub const DEFAULT_VECTOR_THRESHOLD: f32 = 0.35;

/// How many candidates each ranking contributes to fusion, per requested result.
const CANDIDATE_MULTIPLIER: usize = 3;

/// Ranking knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub semantic_weight: f32,
    pub vector_threshold: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            vector_threshold: DEFAULT_VECTOR_THRESHOLD,
        }
    }
}

/// Identity and width of the vectors an engine holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingSpec {
    pub model_id: [u8; 32],
    pub dimensions: usize,
}

impl EmbeddingSpec {
    pub fn of(embedder: &dyn Embedder) -> Self {
        Self {
            model_id: embedder.model_id(),
            dimensions: embedder.dimensions(),
        }
    }
}

/// In-memory full-text + vector index.
///
/// Documents are keyed by record id and kept in insertion order so ties rank
/// deterministically and snapshots are stable.
pub struct IndexEngine {
    documents: HashMap<String, IndexedDocument>,
    order: Vec<String>,
    embedding: Option<EmbeddingSpec>,
    options: EngineOptions,
}

impl IndexEngine {
    /// Empty engine. `embedding` is `Some` when an embedder is active.
    pub fn new(embedding: Option<EmbeddingSpec>, options: EngineOptions) -> Self {
        Self {
            documents: HashMap::new(),
            order: Vec::new(),
            embedding,
            options,
        }
    }

    /// Rebuild an engine from [`IndexEngine::serialize`] output.
    ///
    /// With `expected` set, the snapshot must come from the same model and
    /// width. Without it, whatever vectors the snapshot holds are kept.
    pub fn restore(
        bytes: &[u8],
        expected: Option<EmbeddingSpec>,
        options: EngineOptions,
    ) -> Result<Self, IndexError> {
        let snapshot = snapshot::decode(bytes)?;

        if let Some(spec) = expected {
            if snapshot.model_id != spec.model_id {
                return Err(SnapshotError::ModelMismatch.into());
            }
            if snapshot.dimensions != spec.dimensions {
                return Err(SnapshotError::DimensionMismatch {
                    expected: spec.dimensions,
                    got: snapshot.dimensions,
                }
                .into());
            }
        }

        let embedding = expected.or_else(|| {
            (snapshot.dimensions > 0).then_some(EmbeddingSpec {
                model_id: snapshot.model_id,
                dimensions: snapshot.dimensions,
            })
        });

        let mut engine = Self::new(embedding, options);
        for doc in snapshot.documents {
            engine.insert_document(doc)?;
        }

        Ok(engine)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let header = match self.embedding {
            Some(spec) => match u16::try_from(spec.dimensions) {
                Ok(dimensions) => SnapshotHeader {
                    model_id: spec.model_id,
                    dimensions,
                },
                Err(_) => {
                    log::warn!(
                        "{} dimensions do not fit a snapshot, dropping vectors",
                        spec.dimensions
                    );
                    SnapshotHeader {
                        model_id: [0u8; 32],
                        dimensions: 0,
                    }
                }
            },
            None => SnapshotHeader {
                model_id: [0u8; 32],
                dimensions: 0,
            },
        };

        let documents: Vec<&IndexedDocument> = self.documents().collect();
        snapshot::encode(header, documents.iter().copied())
    }

    /// Insert a record as a text-only document.
    pub fn insert(&mut self, record: &Record) -> Result<bool, IndexError> {
        self.insert_document(IndexedDocument::from_record(record))
    }

    /// Insert a document. Returns `false` if the id is already indexed, in
    /// which case the engine is left untouched.
    pub fn insert_document(&mut self, doc: IndexedDocument) -> Result<bool, IndexError> {
        if self.documents.contains_key(&doc.id) {
            return Ok(false);
        }

        if let Some(embedding) = &doc.embedding {
            let dimensions = self.embedding.map(|spec| spec.dimensions).unwrap_or(0);
            validate_embedding(embedding, dimensions)?;
        }

        self.order.push(doc.id.clone());
        self.documents.insert(doc.id.clone(), doc);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    pub fn embedding_spec(&self) -> Option<EmbeddingSpec> {
        self.embedding
    }

    /// Number of documents carrying a vector.
    pub fn vector_count(&self) -> usize {
        self.documents
            .values()
            .filter(|doc| doc.embedding.is_some())
            .count()
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &IndexedDocument> {
        self.order.iter().filter_map(|id| self.documents.get(id))
    }

    /// Text relevance only.
    pub fn search_fulltext(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        score_lexical(query, self.documents())
            .into_iter()
            .take(limit)
            .filter_map(|hit| {
                let score = hit.score();
                self.result_for(&hit.id, score)
            })
            .collect()
    }

    /// Text relevance fused with vector similarity.
    ///
    /// Without a query vector, or when no document carries one, this ranks by
    /// text relevance alone. A query vector of the wrong width is an error.
    pub fn search_hybrid(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let Some(query_embedding) = query_embedding else {
            return Ok(self.search_fulltext(query, limit));
        };

        let dimensions = self.embedding.map(|spec| spec.dimensions).unwrap_or(0);
        if query_embedding.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: query_embedding.len(),
            });
        }

        if self.vector_count() == 0 {
            return Ok(self.search_fulltext(query, limit));
        }

        let candidates = limit.saturating_mul(CANDIDATE_MULTIPLIER).max(limit);

        let semantic = vector::search(
            query_embedding,
            self.documents(),
            dimensions,
            self.options.vector_threshold,
            candidates,
        )?;
        let lexical = score_lexical(query, self.documents());

        let semantic_ids: Vec<&str> = semantic.iter().map(|hit| hit.id.as_str()).collect();
        let lexical_ids: Vec<&str> = lexical
            .iter()
            .take(candidates)
            .map(|hit| hit.id.as_str())
            .collect();

        Ok(rrf_fusion(&semantic_ids, &lexical_ids, self.options.semantic_weight)
            .into_iter()
            .take(limit)
            .filter_map(|hit| self.result_for(&hit.id, hit.score.max(0.0)))
            .collect())
    }

    fn result_for(&self, id: &str, score: f32) -> Option<SearchResult> {
        self.documents.get(id).map(|doc| SearchResult {
            record: doc.to_record(),
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::model_id_hash;

    fn record(id: &str, title: &str) -> Record {
        Record::new(format!("https://example.com/{id}"), title)
    }

    fn spec(dimensions: usize) -> EmbeddingSpec {
        EmbeddingSpec {
            model_id: model_id_hash("test-model"),
            dimensions,
        }
    }

    fn vector_doc(id: &str, title: &str, embedding: Vec<f32>) -> IndexedDocument {
        IndexedDocument {
            embedding: Some(embedding),
            ..IndexedDocument::from_record(&record(id, title))
        }
    }

    #[test]
    fn test_new_engine_is_empty() {
        let engine = IndexEngine::new(None, EngineOptions::default());
        assert!(engine.is_empty());
        assert_eq!(engine.len(), 0);
        assert!(engine.search_fulltext("anything", 10).is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut engine = IndexEngine::new(None, EngineOptions::default());

        assert!(engine.insert(&record("a", "Rust Ownership")).unwrap());
        assert!(!engine.insert(&record("a", "Rust Ownership (updated)")).unwrap());

        assert_eq!(engine.len(), 1);
        let results = engine.search_fulltext("rust ownership", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.title, "Rust Ownership");
    }

    #[test]
    fn test_serialize_restore_finds_every_title() {
        let titles = [
            "Rust Ownership",
            "Go Channels",
            "Zig Comptime Tricks",
            "Postgres Vacuum Internals",
            "Kubernetes Operators",
        ];
        let mut engine = IndexEngine::new(None, EngineOptions::default());
        for (i, title) in titles.iter().enumerate() {
            engine.insert(&record(&i.to_string(), title)).unwrap();
        }

        let bytes = engine.serialize();
        let restored = IndexEngine::restore(&bytes, None, EngineOptions::default()).unwrap();

        assert_eq!(restored.len(), titles.len());
        for (i, title) in titles.iter().enumerate() {
            let results = restored.search_fulltext(title, 20);
            assert!(
                results.iter().any(|r| r.id() == format!("https://example.com/{i}")),
                "{title} not found after restore"
            );
        }
    }

    #[test]
    fn test_restore_keeps_vectors_and_order() {
        let mut engine = IndexEngine::new(Some(spec(2)), EngineOptions::default());
        engine.insert_document(vector_doc("b", "Second", vec![0.0, 1.0])).unwrap();
        engine.insert_document(vector_doc("a", "First", vec![1.0, 0.0])).unwrap();

        let restored =
            IndexEngine::restore(&engine.serialize(), Some(spec(2)), EngineOptions::default())
                .unwrap();

        let ids: Vec<&str> = restored.documents().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["https://example.com/b", "https://example.com/a"]);
        assert_eq!(restored.vector_count(), 2);
    }

    #[test]
    fn test_restore_rejects_other_model() {
        let engine = IndexEngine::new(Some(spec(2)), EngineOptions::default());
        let other = EmbeddingSpec {
            model_id: model_id_hash("other-model"),
            dimensions: 2,
        };

        let result =
            IndexEngine::restore(&engine.serialize(), Some(other), EngineOptions::default());
        assert!(matches!(result, Err(IndexError::Snapshot(SnapshotError::ModelMismatch))));
    }

    #[test]
    fn test_restore_text_only_snapshot_with_embedder_is_incompatible() {
        let engine = IndexEngine::new(None, EngineOptions::default());
        let result =
            IndexEngine::restore(&engine.serialize(), Some(spec(2)), EngineOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_restore_corrupt_bytes_fails() {
        let result = IndexEngine::restore(b"garbage", None, EngineOptions::default());
        assert!(matches!(result, Err(IndexError::Snapshot(_))));
    }

    #[test]
    fn test_insert_rejects_wrong_width() {
        let mut engine = IndexEngine::new(Some(spec(3)), EngineOptions::default());
        let result = engine.insert_document(vector_doc("a", "A", vec![1.0, 0.0]));
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_insert_vector_without_embedding_spec_is_rejected() {
        let mut engine = IndexEngine::new(None, EngineOptions::default());
        let result = engine.insert_document(vector_doc("a", "A", vec![1.0, 0.0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_fulltext_respects_limit() {
        let mut engine = IndexEngine::new(None, EngineOptions::default());
        for i in 0..10 {
            engine.insert(&record(&i.to_string(), &format!("Rust tip #{i}"))).unwrap();
        }

        assert_eq!(engine.search_fulltext("rust", 3).len(), 3);
    }

    #[test]
    fn test_hybrid_without_query_vector_is_lexical() {
        let mut engine = IndexEngine::new(None, EngineOptions::default());
        engine.insert(&record("a", "Rust Ownership")).unwrap();
        engine.insert(&record("b", "Go Channels")).unwrap();

        let results = engine.search_hybrid("rust", None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), "https://example.com/a");
    }

    #[test]
    fn test_hybrid_surfaces_semantic_matches() {
        let mut engine = IndexEngine::new(Some(spec(2)), EngineOptions::default());
        engine
            .insert_document(vector_doc("a", "Memory safety without GC", vec![1.0, 0.0]))
            .unwrap();
        engine
            .insert_document(vector_doc("b", "Sourdough starter", vec![0.0, 1.0]))
            .unwrap();

        // no lexical overlap with either title
        let results = engine.search_hybrid("borrow checker", Some(&[0.9, 0.1]), 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), "https://example.com/a");
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_hybrid_rejects_wrong_query_width() {
        let mut engine = IndexEngine::new(Some(spec(2)), EngineOptions::default());
        engine.insert_document(vector_doc("a", "A", vec![1.0, 0.0])).unwrap();

        let result = engine.search_hybrid("a", Some(&[1.0, 0.0, 0.0]), 10);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { expected: 2, got: 3 })));
    }

    #[test]
    fn test_hybrid_respects_limit() {
        let mut engine = IndexEngine::new(Some(spec(2)), EngineOptions::default());
        for i in 0..10 {
            let title = format!("Rust tip #{i}");
            engine
                .insert_document(vector_doc(&i.to_string(), &title, vec![1.0, i as f32]))
                .unwrap();
        }

        let results = engine.search_hybrid("rust", Some(&[1.0, 0.0]), 3).unwrap();
        assert_eq!(results.len(), 3);
    }
}
