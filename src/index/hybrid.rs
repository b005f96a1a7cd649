//! Hybrid ranking combining semantic and lexical results.
//!
//! Uses Weighted Reciprocal Rank Fusion (RRF). The semantic weight (α)
//! controls the balance:
//! - α=0.5: equal weight to both (classic RRF)
//! - α=0.6: 60% semantic, 40% lexical (default)
//! - α=1.0: pure semantic ranking

use std::collections::HashMap;

/// RRF constant (standard value from literature).
const RRF_K: f32 = 60.0;

/// Default semantic weight for hybrid search.
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.6;

#[derive(Debug, Clone)]
pub struct HybridResult {
    pub id: String,
    /// RRF fusion score
    pub score: f32,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

/// Fuse semantic and lexical rankings:
///
///   score(d) = α / (k + rank_semantic) + (1 - α) / (k + rank_lexical)
///
/// Both inputs are ordered best first. Ties keep first-seen order (semantic
/// ranking, then lexical) so output is deterministic.
pub fn rrf_fusion(
    semantic_ids: &[&str],
    lexical_ids: &[&str],
    semantic_weight: f32,
) -> Vec<HybridResult> {
    let sem_weight = semantic_weight.clamp(0.0, 1.0);
    let lex_weight = 1.0 - sem_weight;

    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, HybridResult> = HashMap::new();

    for (rank, &id) in semantic_ids.iter().enumerate() {
        let rrf_score = sem_weight / (RRF_K + rank as f32 + 1.0);
        if scores.contains_key(id) {
            continue;
        }
        order.push(id.to_string());
        scores.insert(
            id.to_string(),
            HybridResult {
                id: id.to_string(),
                score: rrf_score,
                semantic_rank: Some(rank + 1),
                lexical_rank: None,
            },
        );
    }

    for (rank, &id) in lexical_ids.iter().enumerate() {
        let rrf_score = lex_weight / (RRF_K + rank as f32 + 1.0);

        match scores.get_mut(id) {
            Some(result) => {
                if result.lexical_rank.is_none() {
                    result.score += rrf_score;
                    result.lexical_rank = Some(rank + 1);
                }
            }
            None => {
                order.push(id.to_string());
                scores.insert(
                    id.to_string(),
                    HybridResult {
                        id: id.to_string(),
                        score: rrf_score,
                        semantic_rank: None,
                        lexical_rank: Some(rank + 1),
                    },
                );
            }
        }
    }

    let mut results: Vec<HybridResult> = order
        .iter()
        .filter_map(|id| scores.remove(id))
        .collect();
    // stable sort keeps first-seen order among equal scores
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    results
}
