//! Public query surface.
//!
//! [`SearchService`] walks an ordered list of [`SearchStrategy`] tiers and
//! returns the first successful answer. The default ladder is hybrid, then
//! fulltext, then a substring scan straight over the record store. Callers
//! never see an error from [`SearchService::search`]; at worst they get fewer
//! results.

use std::sync::Arc;

use async_trait::async_trait;

use crate::index::{IndexError, SearchResult};
use crate::lifecycle::{IndexLifecycle, IndexStats};
use crate::records::{Record, RecordStore, RecordStoreError};

/// Result count used when the caller does not pass one.
pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("record store error: {0}")]
    Records(#[from] RecordStoreError),

    #[error("index is degraded")]
    Degraded,
}

/// One tier of the fallback ladder.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError>;
}

/// Lexical relevance fused with vector similarity.
pub struct HybridSearch {
    lifecycle: Arc<IndexLifecycle>,
}

impl HybridSearch {
    pub fn new(lifecycle: Arc<IndexLifecycle>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl SearchStrategy for HybridSearch {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        if self.lifecycle.is_degraded() {
            return Err(SearchError::Degraded);
        }
        Ok(self.lifecycle.search_hybrid(query, limit).await?)
    }
}

/// Lexical relevance only.
pub struct FulltextSearch {
    lifecycle: Arc<IndexLifecycle>,
}

impl FulltextSearch {
    pub fn new(lifecycle: Arc<IndexLifecycle>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl SearchStrategy for FulltextSearch {
    fn name(&self) -> &'static str {
        "fulltext"
    }

    async fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        if self.lifecycle.is_degraded() {
            return Err(SearchError::Degraded);
        }
        Ok(self.lifecycle.search_fulltext(query, limit).await?)
    }
}

/// Case-insensitive substring scan over every record in the store.
pub struct NaiveScan {
    records: Arc<dyn RecordStore>,
}

impl NaiveScan {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl SearchStrategy for NaiveScan {
    fn name(&self) -> &'static str {
        "naive"
    }

    async fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let records = self.records.all_records().await?;
        Ok(naive_scan(records, query, limit))
    }
}

/// Keep records whose title and summaries contain `query`, in store order.
///
/// Scores are `1 / (rank + 1)`: strictly decreasing, first hit highest.
pub fn naive_scan(records: Vec<Record>, query: &str, limit: usize) -> Vec<SearchResult> {
    let needle = query.to_lowercase();

    records
        .into_iter()
        .filter(|record| record.haystack().contains(&needle))
        .take(limit)
        .enumerate()
        .map(|(rank, record)| SearchResult {
            record,
            score: 1.0 / (rank as f32 + 1.0),
        })
        .collect()
}

pub struct SearchService {
    lifecycle: Arc<IndexLifecycle>,
    records: Arc<dyn RecordStore>,
    strategies: Vec<Box<dyn SearchStrategy>>,
    default_limit: usize,
}

impl SearchService {
    /// Service with the hybrid, fulltext, naive ladder.
    pub fn new(lifecycle: Arc<IndexLifecycle>, records: Arc<dyn RecordStore>) -> Self {
        let strategies: Vec<Box<dyn SearchStrategy>> = vec![
            Box::new(HybridSearch::new(lifecycle.clone())),
            Box::new(FulltextSearch::new(lifecycle.clone())),
            Box::new(NaiveScan::new(records.clone())),
        ];
        Self::with_strategies(lifecycle, records, strategies)
    }

    /// Service with a custom ladder, tried in order.
    pub fn with_strategies(
        lifecycle: Arc<IndexLifecycle>,
        records: Arc<dyn RecordStore>,
        strategies: Vec<Box<dyn SearchStrategy>>,
    ) -> Self {
        Self {
            lifecycle,
            records,
            strategies,
            default_limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub async fn initialize(&self) {
        self.lifecycle.initialize(self.records.as_ref()).await;
    }

    /// Run `query` down the ladder. `limit` defaults to the configured one.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return vec![];
        }
        let limit = limit.unwrap_or(self.default_limit);

        for strategy in &self.strategies {
            match strategy.query(query, limit).await {
                Ok(mut results) => {
                    results.truncate(limit);
                    log::debug!(
                        "{} search for {query:?}: {} results",
                        strategy.name(),
                        results.len()
                    );
                    return results;
                }
                Err(
                    err @ (SearchError::Degraded
                    | SearchError::Index(IndexError::NotInitialized)),
                ) => {
                    log::debug!("skipping {} search: {err}", strategy.name());
                }
                Err(err) => {
                    log::warn!("{} search failed, trying next tier: {err}", strategy.name());
                }
            }
        }

        log::error!("every search tier failed for {query:?}");
        vec![]
    }

    /// Add newly ingested records to the live index.
    ///
    /// Initializes the index first if needed. The snapshot is not written;
    /// that happens on [`SearchService::shutdown`] or the next rebuild.
    pub async fn index_records(&self, records: Vec<Record>) -> Result<usize, SearchError> {
        self.initialize().await;
        Ok(self.lifecycle.index_records(records).await?)
    }

    /// Re-index everything in the record store and persist the result.
    pub async fn rebuild_index(&self) -> Result<usize, SearchError> {
        let count = self.lifecycle.rebuild(self.records.as_ref()).await?;
        self.lifecycle.clear_degraded();
        log::info!("rebuilt search index with {count} documents");
        Ok(count)
    }

    /// Persist the index. Safe to call without `initialize`.
    pub async fn shutdown(&self) {
        self.lifecycle.persist().await;
    }

    pub async fn stats(&self) -> IndexStats {
        self.lifecycle.stats().await
    }
}
