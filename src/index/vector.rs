//! Cosine similarity search over document embeddings.

use std::cmp::Ordering;

use crate::index::{IndexError, IndexedDocument};

/// A document scored by vector similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

/// Check an embedding can be stored in an index of `dimensions` width.
pub fn validate_embedding(embedding: &[f32], dimensions: usize) -> Result<(), IndexError> {
    if embedding.len() != dimensions {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            got: embedding.len(),
        });
    }

    if l2_norm(embedding) < f32::EPSILON {
        return Err(IndexError::ZeroNormVector);
    }

    Ok(())
}

/// Rank documents carrying a vector by similarity to `query`.
///
/// Documents without a vector are skipped. Results below `threshold` are
/// dropped; the rest are sorted by score (highest first) and cut to `limit`.
pub fn search<'a>(
    query: &[f32],
    documents: impl Iterator<Item = &'a IndexedDocument>,
    dimensions: usize,
    threshold: f32,
    limit: usize,
) -> Result<Vec<VectorHit>, IndexError> {
    validate_embedding(query, dimensions)?;
    let query_norm = l2_norm(query);

    let mut results: Vec<VectorHit> = documents
        .filter_map(|doc| {
            let embedding = doc.embedding.as_deref()?;
            let score = cosine_similarity(query, embedding, query_norm);
            (score >= threshold).then(|| VectorHit {
                id: doc.id.clone(),
                score,
            })
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    results.truncate(limit);

    Ok(results)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Assumes query_norm is precomputed.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    if query.len() != target.len() {
        return 0.0;
    }

    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}
