//! Lexical (keyword) scoring over indexed documents.
//!
//! Field weights: title 2.0, category 3.0 (exact tag), source 1.0 (exact
//! label), summaries up to 1.0 each. Summary matches are weighted inversely
//! to summary length so long write-ups do not win on surface area alone.

use std::cmp::Ordering;

use crate::index::IndexedDocument;

/// Result of lexical scoring.
#[derive(Debug, Clone)]
pub struct LexicalResult {
    pub id: String,
    /// Number of query terms matched
    pub matched_terms: usize,
    /// Weighted hits across all fields (length-normalized)
    pub total_hits: f32,
}

impl LexicalResult {
    /// Single non-negative score that orders the same way as
    /// (matched_terms, total_hits).
    pub fn score(&self) -> f32 {
        self.matched_terms as f32 + self.total_hits / (self.total_hits + 1.0)
    }
}

/// Score documents against a query.
///
/// Results are sorted by matched_terms DESC, then total_hits DESC. Only
/// documents with at least one match are returned.
pub fn score_lexical<'a>(
    query: &str,
    documents: impl Iterator<Item = &'a IndexedDocument>,
) -> Vec<LexicalResult> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return vec![];
    }

    let mut results: Vec<LexicalResult> = documents
        .filter_map(|doc| {
            let (matched_terms, total_hits) = count_matches(&query_terms, doc);
            (matched_terms > 0).then(|| LexicalResult {
                id: doc.id.clone(),
                matched_terms,
                total_hits,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.matched_terms
            .cmp(&a.matched_terms)
            .then_with(|| b.total_hits.partial_cmp(&a.total_hits).unwrap_or(Ordering::Equal))
    });

    results
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at", "to",
    "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so", "if", "then",
];

/// Tokenize query into lowercase terms, dropping 1-char terms and stop words.
///
/// A query made only of dropped terms (e.g. "C") is kept as one phrase so it
/// can still match.
fn tokenize(query: &str) -> Vec<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect();

    if !terms.is_empty() {
        return terms;
    }

    let phrase = query.trim().to_lowercase();
    if phrase.is_empty() {
        vec![]
    } else {
        vec![phrase]
    }
}

/// Baseline summary length for normalization (characters).
const SUMMARY_LENGTH_BASELINE: f32 = 100.0;

/// 1.0 up to the baseline, then logarithmic decay.
fn summary_length_weight(len: usize) -> f32 {
    if len <= SUMMARY_LENGTH_BASELINE as usize {
        return 1.0;
    }
    1.0 / (1.0 + (len as f32 / SUMMARY_LENGTH_BASELINE).ln())
}

fn count_matches(query_terms: &[String], doc: &IndexedDocument) -> (usize, f32) {
    let title = doc.title.to_lowercase();
    let summaries: Vec<(String, f32)> = [&doc.summary, &doc.long_summary]
        .into_iter()
        .flatten()
        .map(|text| (text.to_lowercase(), summary_length_weight(text.len())))
        .collect();
    let category = doc.category.to_lowercase();
    let source = doc.source.to_lowercase();

    let mut matched_terms = 0;
    let mut total_hits: f32 = 0.0;

    for term in query_terms {
        let mut term_hits: f32 = 0.0;

        if title.contains(term.as_str()) {
            term_hits += 2.0;
        }

        for (text, weight) in &summaries {
            if text.contains(term.as_str()) {
                term_hits += weight;
            }
        }

        if !category.is_empty() && category == *term {
            term_hits += 3.0;
        }

        if !source.is_empty() && source == *term {
            term_hits += 1.0;
        }

        if term_hits > 0.0 {
            matched_terms += 1;
            total_hits += term_hits;
        }
    }

    (matched_terms, total_hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Record;

    fn doc(id: &str, title: &str, summary: &str) -> IndexedDocument {
        IndexedDocument::from_record(&Record {
            summary: (!summary.is_empty()).then(|| summary.to_string()),
            ..Record::new(id, title)
        })
    }

    #[test]
    fn test_tokenize_basic() {
        assert_eq!(tokenize("machine learning guide"), vec!["machine", "learning", "guide"]);
    }

    #[test]
    fn test_tokenize_filters_stop_words_and_short_terms() {
        assert_eq!(tokenize("the quick brown fox"), vec!["quick", "brown", "fox"]);
        assert_eq!(tokenize("I am a person"), vec!["am", "person"]);
    }

    #[test]
    fn test_tokenize_handles_punctuation_and_case() {
        assert_eq!(tokenize("RUST-lang, python/django"), vec!["rust", "lang", "python", "django"]);
    }

    #[test]
    fn test_tokenize_keeps_phrase_when_everything_filtered() {
        assert_eq!(tokenize("C"), vec!["c"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_no_matches() {
        let docs = vec![doc("a", "Cooking Recipes", "Food and meals")];
        assert!(score_lexical("programming rust", docs.iter()).is_empty());
    }

    #[test]
    fn test_title_match() {
        let docs = vec![
            doc("a", "Rust Programming Guide", "Learn rust basics"),
            doc("b", "Python Tutorial", "Python for beginners"),
        ];

        let results = score_lexical("rust", docs.iter());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn test_category_match() {
        let mut tagged = doc("a", "Untitled", "");
        tagged.category = "Rust".to_string();
        let docs = vec![tagged];

        let results = score_lexical("rust", docs.iter());
        assert_eq!(results.len(), 1);
        assert!(results[0].total_hits >= 3.0);
    }

    #[test]
    fn test_sorted_by_relevance() {
        let docs = vec![
            doc("a", "Python Guide", "Also mentions rust once"),
            doc("b", "Rust Tutorial", "Learn rust programming"),
            doc("c", "Cooking Recipes", "No programming here"),
        ];

        let results = score_lexical("rust", docs.iter());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "b");
        assert_eq!(results[1].id, "a");
        assert!(results[0].score() > results[1].score());
    }

    #[test]
    fn test_multi_term_query_prefers_more_terms() {
        let docs = vec![
            doc("a", "Rust Guide", "Programming language"),
            doc("b", "Machine Learning with Rust", "Programming ML"),
        ];

        let results = score_lexical("rust machine learning", docs.iter());
        assert_eq!(results[0].id, "b");
        assert!(results[0].matched_terms > results[1].matched_terms);
    }

    #[test]
    fn test_score_is_non_negative_and_monotonic() {
        let fewer = LexicalResult { id: "a".into(), matched_terms: 1, total_hits: 50.0 };
        let more = LexicalResult { id: "b".into(), matched_terms: 2, total_hits: 0.5 };
        assert!(fewer.score() >= 0.0);
        assert!(more.score() > fewer.score());
    }

    #[test]
    fn test_summary_length_weight_decay() {
        assert_eq!(summary_length_weight(50), 1.0);
        let w200 = summary_length_weight(200);
        let w800 = summary_length_weight(800);
        assert!(w200 < 1.0);
        assert!(w800 < w200);
    }

    #[test]
    fn test_long_summary_penalized() {
        let long = "This comprehensive digest covers many topics including JavaScript, \
            Python, databases, web development, DevOps, cloud computing, and also briefly \
            mentions rust somewhere in here along with many other technologies and frameworks";
        let docs = vec![doc("short", "Short", "Learn rust basics"), doc("long", "Long", long)];

        let results = score_lexical("rust", docs.iter());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "short");
        assert!(results[0].total_hits > results[1].total_hits);
    }
}
