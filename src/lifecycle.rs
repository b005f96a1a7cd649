//! Ownership of the live [`IndexEngine`].
//!
//! [`IndexLifecycle`] is the only thing allowed to create, replace or drop the
//! engine. It restores the engine from a snapshot once, rebuilds it from the
//! record store when the snapshot is missing, unreadable or empty, and writes
//! it back on request. Every failure on those paths is logged and absorbed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};

use crate::embeddings::{Embedder, EmbeddingProvider};
use crate::index::{
    EmbeddingSpec, EngineOptions, IndexEngine, IndexError, IndexedDocument, SearchResult,
};
use crate::records::{Record, RecordStore};
use crate::storage::SnapshotStorage;

/// Default logical key of the snapshot.
pub const DEFAULT_INDEX_KEY: &str = "search-index.bin";

#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Logical snapshot key: a file name for local storage, a row id for remote
    pub index_key: String,
    pub engine: EngineOptions,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            index_key: DEFAULT_INDEX_KEY.to_string(),
            engine: EngineOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Point-in-time view of the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub state: LifecycleState,
    pub documents: usize,
    pub vectors: usize,
    pub embeddings_enabled: bool,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    pub degraded: bool,
}

pub struct IndexLifecycle {
    settings: IndexSettings,
    storage: Arc<dyn SnapshotStorage>,
    embeddings: Arc<dyn EmbeddingProvider>,
    /// Swapped out wholesale by `reset`
    init: Mutex<Arc<OnceCell<()>>>,
    initializing: AtomicBool,
    engine: RwLock<Option<IndexEngine>>,
    embedder: RwLock<Option<Arc<dyn Embedder>>>,
    degraded: AtomicBool,
}

impl IndexLifecycle {
    pub fn new(
        settings: IndexSettings,
        storage: Arc<dyn SnapshotStorage>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            settings,
            storage,
            embeddings,
            init: Mutex::new(Arc::new(OnceCell::new())),
            initializing: AtomicBool::new(false),
            engine: RwLock::new(None),
            embedder: RwLock::new(None),
            degraded: AtomicBool::new(false),
        }
    }

    /// Bring the index to the ready state.
    ///
    /// Concurrent and repeated calls share a single attempt: the snapshot is
    /// looked up and read at most once until [`IndexLifecycle::reset`].
    pub async fn initialize(&self, records: &dyn RecordStore) {
        let cell = self.init_cell();
        cell.get_or_init(|| async {
            self.initializing.store(true, Ordering::SeqCst);
            self.run_initialize(records).await;
            self.initializing.store(false, Ordering::SeqCst);
        })
        .await;
    }

    async fn run_initialize(&self, records: &dyn RecordStore) {
        let embedder = self.embeddings.try_init().await;
        *self.embedder.write().await = embedder.clone();
        let spec = embedder.as_deref().map(EmbeddingSpec::of);

        let engine = match self.restore(spec).await {
            Some(engine) => engine,
            None => IndexEngine::new(spec, self.settings.engine),
        };
        let empty = engine.is_empty();
        *self.engine.write().await = Some(engine);

        if !empty {
            return;
        }

        log::info!("index is empty, rebuilding from the record store");
        if let Err(err) = self.rebuild(records).await {
            log::error!("initial index rebuild failed, falling back to plain scans: {err}");
            self.mark_degraded();
        }
    }

    async fn restore(&self, spec: Option<EmbeddingSpec>) -> Option<IndexEngine> {
        let key = &self.settings.index_key;

        match self.storage.exists(key).await {
            Ok(true) => {}
            Ok(false) => {
                log::info!("no index snapshot at '{key}'");
                return None;
            }
            Err(err) => {
                log::warn!("could not look up index snapshot '{key}': {err}");
                return None;
            }
        }

        let bytes = match self.storage.read(key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("could not read index snapshot '{key}': {err}");
                return None;
            }
        };

        let options = self.settings.engine;
        let restored =
            tokio::task::spawn_blocking(move || IndexEngine::restore(&bytes, spec, options))
                .await
                .map_err(|err| IndexError::Internal(format!("snapshot restore panicked: {err}")))
                .and_then(|result| result);

        match restored {
            Ok(engine) => {
                log::info!("restored index snapshot '{key}' with {} documents", engine.len());
                Some(engine)
            }
            Err(err) => {
                log::warn!("discarding index snapshot '{key}': {err}");
                None
            }
        }
    }

    /// Replace the engine with one built from every record in the store,
    /// then persist it. Returns the number of indexed documents.
    ///
    /// The new engine is published only once fully built. Records that fail
    /// to index are logged and skipped.
    pub async fn rebuild(&self, records: &dyn RecordStore) -> Result<usize, IndexError> {
        let records = records.all_records().await?;

        let embedder = self.embeddings.try_init().await;
        *self.embedder.write().await = embedder.clone();

        let options = self.settings.engine;
        let engine = tokio::task::spawn_blocking(move || build_engine(&records, embedder, options))
            .await
            .map_err(|err| IndexError::Internal(format!("index build panicked: {err}")))?;

        let count = engine.len();
        *self.engine.write().await = Some(engine);
        self.persist().await;

        Ok(count)
    }

    /// Write the current engine to storage. Failures are logged only.
    pub async fn persist(&self) {
        let key = &self.settings.index_key;
        let bytes = {
            let guard = self.engine.read().await;
            match guard.as_ref() {
                Some(engine) => engine.serialize(),
                None => {
                    log::debug!("no index to persist");
                    return;
                }
            }
        };

        match self.storage.write(key, &bytes).await {
            Ok(()) => log::info!("persisted index snapshot '{key}' ({} bytes)", bytes.len()),
            Err(err) => log::error!("failed to persist index snapshot '{key}': {err}"),
        }
    }

    /// Drop the engine, the initialization attempt, the embedder and the
    /// degraded flag.
    pub async fn reset(&self) {
        *self
            .init
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(OnceCell::new());
        self.initializing.store(false, Ordering::SeqCst);
        *self.engine.write().await = None;
        *self.embedder.write().await = None;
        self.embeddings.reset().await;
        self.clear_degraded();
    }

    /// Add one record to the live engine. `Ok(false)` if already indexed.
    pub async fn index_record(&self, record: &Record) -> Result<bool, IndexError> {
        Ok(self.index_records(vec![record.clone()]).await? > 0)
    }

    /// Add records to the live engine without rebuilding. Returns how many
    /// were new.
    pub async fn index_records(&self, records: Vec<Record>) -> Result<usize, IndexError> {
        let fresh: Vec<Record> = {
            let guard = self.engine.read().await;
            let engine = guard.as_ref().ok_or(IndexError::NotInitialized)?;
            records
                .into_iter()
                .filter(|record| !engine.contains(&record.id))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        // embed before taking the write lock so searches keep running
        let embedder = self.embedder.read().await.clone();
        let documents = tokio::task::spawn_blocking(move || {
            fresh
                .iter()
                .map(|record| prepare_document(record, embedder.as_deref()))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| IndexError::Internal(format!("embedding task panicked: {err}")))?;

        let mut guard = self.engine.write().await;
        let engine = guard.as_mut().ok_or(IndexError::NotInitialized)?;

        let mut added = 0;
        for doc in documents {
            let id = doc.id.clone();
            match insert_prepared(engine, doc) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(err) => log::warn!("skipping record {id}: {err}"),
            }
        }

        Ok(added)
    }

    pub async fn search_hybrid(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if self.engine.read().await.is_none() {
            return Err(IndexError::NotInitialized);
        }

        let embedder = self.embedder.read().await.clone();
        let query_embedding = match embedder {
            Some(embedder) => {
                let text = query.to_string();
                let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
                    .await
                    .map_err(|err| {
                        IndexError::Internal(format!("embedding task panicked: {err}"))
                    })??;
                Some(embedding)
            }
            None => None,
        };

        let guard = self.engine.read().await;
        let engine = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        engine.search_hybrid(query, query_embedding.as_deref(), limit)
    }

    pub async fn search_fulltext(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let guard = self.engine.read().await;
        let engine = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        Ok(engine.search_fulltext(query, limit))
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn mark_degraded(&self) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            log::warn!("search index marked degraded");
        }
    }

    pub fn clear_degraded(&self) {
        self.degraded.store(false, Ordering::SeqCst);
    }

    pub async fn state(&self) -> LifecycleState {
        if self.initializing.load(Ordering::SeqCst) {
            LifecycleState::Initializing
        } else if self.init_cell().initialized() || self.engine.read().await.is_some() {
            LifecycleState::Ready
        } else {
            LifecycleState::Uninitialized
        }
    }

    pub async fn document_count(&self) -> usize {
        self.engine
            .read()
            .await
            .as_ref()
            .map(IndexEngine::len)
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state().await;
        let (documents, vectors, dimensions) = {
            let guard = self.engine.read().await;
            match guard.as_ref() {
                Some(engine) => (
                    engine.len(),
                    engine.vector_count(),
                    engine.embedding_spec().map(|spec| spec.dimensions),
                ),
                None => (0, 0, None),
            }
        };
        let embedder = self.embedder.read().await.clone();

        IndexStats {
            state,
            documents,
            vectors,
            embeddings_enabled: embedder.is_some(),
            model: embedder.map(|embedder| embedder.model_name().to_string()),
            dimensions,
            degraded: self.is_degraded(),
        }
    }

    fn init_cell(&self) -> Arc<OnceCell<()>> {
        self.init
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn build_engine(
    records: &[Record],
    embedder: Option<Arc<dyn Embedder>>,
    options: EngineOptions,
) -> IndexEngine {
    let spec = embedder.as_deref().map(EmbeddingSpec::of);
    let mut engine = IndexEngine::new(spec, options);

    let mut skipped = 0;
    for record in records {
        if engine.contains(&record.id) {
            continue;
        }
        let doc = prepare_document(record, embedder.as_deref());
        if let Err(err) = insert_prepared(&mut engine, doc) {
            skipped += 1;
            log::warn!("skipping record {}: {err}", record.id);
        }
    }

    log::info!("indexed {} records ({skipped} skipped)", engine.len());
    engine
}

fn prepare_document(record: &Record, embedder: Option<&dyn Embedder>) -> IndexedDocument {
    let doc = IndexedDocument::from_record(record);
    match embedder {
        Some(embedder) => doc.with_embedding(embedder),
        None => doc,
    }
}

/// Insert `doc`, retrying text-only if its vector is unusable.
fn insert_prepared(engine: &mut IndexEngine, doc: IndexedDocument) -> Result<bool, IndexError> {
    if doc.embedding.is_none() {
        return engine.insert_document(doc);
    }

    let text_only = IndexedDocument {
        embedding: None,
        ..doc.clone()
    };
    match engine.insert_document(doc) {
        Err(err @ (IndexError::DimensionMismatch { .. } | IndexError::ZeroNormVector)) => {
            log::warn!("indexing {} without a vector: {err}", text_only.id);
            engine.insert_document(text_only)
        }
        other => other,
    }
}
