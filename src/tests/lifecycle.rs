use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::fakes::{record, BagOfWordsEmbedder, CountingRecordStore, FakeD1, FlakyStorage};
use crate::embeddings::{EmbeddingProvider, NoEmbeddings, StaticEmbeddings};
use crate::index::{EngineOptions, IndexEngine};
use crate::lifecycle::{IndexLifecycle, IndexSettings, LifecycleState, DEFAULT_INDEX_KEY};
use crate::records::Record;
use crate::storage::{HttpQueryClient, LocalFileStorage, RemoteRowStorage, DEFAULT_TABLE};

fn records() -> Vec<Record> {
    vec![
        record("rust", "Rust Ownership"),
        record("go", "Go Channels"),
        record("zig", "Zig Comptime"),
    ]
}

fn lifecycle_with(
    storage: Arc<FlakyStorage>,
    embeddings: Arc<dyn EmbeddingProvider>,
) -> IndexLifecycle {
    IndexLifecycle::new(IndexSettings::default(), storage, embeddings)
}

fn bag_of_words(name: &str) -> Arc<dyn EmbeddingProvider> {
    Arc::new(StaticEmbeddings(Arc::new(BagOfWordsEmbedder::new(name, 64))))
}

#[tokio::test]
async fn test_empty_snapshot_triggers_rebuild() {
    let storage = Arc::new(FlakyStorage::new());
    let empty = IndexEngine::new(None, EngineOptions::default()).serialize();
    storage.seed(DEFAULT_INDEX_KEY, &empty).await;

    let store = CountingRecordStore::new(records());
    let lifecycle = lifecycle_with(storage.clone(), Arc::new(NoEmbeddings));
    lifecycle.initialize(&store).await;

    assert_eq!(lifecycle.document_count().await, 3);
    assert_eq!(store.calls(), 1);

    let (exists, read, write) = storage.calls();
    assert_eq!((exists, read), (1, 1));
    // rebuilt index is persisted right away
    assert_eq!(write, 1);
    let persisted = storage.stored(DEFAULT_INDEX_KEY).await.unwrap();
    assert_eq!(IndexEngine::restore(&persisted, None, EngineOptions::default()).unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_read_leaves_usable_index() {
    let storage = Arc::new(FlakyStorage::new());
    storage.seed(DEFAULT_INDEX_KEY, b"whatever").await;
    storage.fail_read.store(true, Ordering::SeqCst);

    let lifecycle = lifecycle_with(storage, Arc::new(NoEmbeddings));
    lifecycle.initialize(&CountingRecordStore::default()).await;

    assert_eq!(lifecycle.state().await, LifecycleState::Ready);
    assert_eq!(lifecycle.document_count().await, 0);
    assert!(!lifecycle.is_degraded());

    assert!(lifecycle.index_record(&record("rust", "Rust Ownership")).await.unwrap());
    let results = lifecycle.search_fulltext("ownership", 20).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_failed_exists_is_treated_as_absent() {
    let storage = Arc::new(FlakyStorage::new());
    storage.fail_exists.store(true, Ordering::SeqCst);

    let lifecycle = lifecycle_with(storage.clone(), Arc::new(NoEmbeddings));
    lifecycle.initialize(&CountingRecordStore::new(records())).await;

    assert_eq!(lifecycle.document_count().await, 3);
    assert_eq!(storage.calls().1, 0);
}

#[tokio::test]
async fn test_failed_write_is_swallowed() {
    let storage = Arc::new(FlakyStorage::new());
    storage.fail_write.store(true, Ordering::SeqCst);

    let lifecycle = lifecycle_with(storage.clone(), Arc::new(NoEmbeddings));
    lifecycle.initialize(&CountingRecordStore::new(records())).await;
    lifecycle.persist().await;

    assert_eq!(lifecycle.document_count().await, 3);
    assert_eq!(storage.calls().2, 2);
    assert!(storage.stored(DEFAULT_INDEX_KEY).await.is_none());
}

#[tokio::test]
async fn test_concurrent_initialize_reads_storage_once() {
    let storage = Arc::new(FlakyStorage::with_delay(Duration::from_millis(20)));
    let mut seeded = IndexEngine::new(None, EngineOptions::default());
    for record in records() {
        seeded.insert(&record).unwrap();
    }
    storage.seed(DEFAULT_INDEX_KEY, &seeded.serialize()).await;

    let lifecycle = Arc::new(lifecycle_with(storage.clone(), Arc::new(NoEmbeddings)));
    let store = Arc::new(CountingRecordStore::default());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lifecycle = lifecycle.clone();
            let store = store.clone();
            tokio::spawn(async move { lifecycle.initialize(store.as_ref()).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(storage.calls(), (1, 1, 0));
    assert_eq!(lifecycle.document_count().await, 3);

    // completed initialization is not repeated either
    lifecycle.initialize(store.as_ref()).await;
    assert_eq!(storage.calls(), (1, 1, 0));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_reset_allows_fresh_initialize() {
    let storage = Arc::new(FlakyStorage::new());
    let store = CountingRecordStore::new(records());
    let lifecycle = lifecycle_with(storage.clone(), Arc::new(NoEmbeddings));

    lifecycle.initialize(&store).await;
    lifecycle.reset().await;
    assert_eq!(lifecycle.state().await, LifecycleState::Uninitialized);

    lifecycle.initialize(&store).await;
    assert_eq!(lifecycle.state().await, LifecycleState::Ready);
    // second run found the snapshot the first one persisted
    assert_eq!(storage.calls().0, 2);
    assert_eq!(storage.calls().1, 1);
    assert_eq!(store.calls(), 1);
}

#[tokio::test]
async fn test_failed_initial_rebuild_marks_degraded() {
    let store = CountingRecordStore::new(records());
    store.fail.store(true, Ordering::SeqCst);

    let lifecycle = lifecycle_with(Arc::new(FlakyStorage::new()), Arc::new(NoEmbeddings));
    lifecycle.initialize(&store).await;

    assert_eq!(lifecycle.state().await, LifecycleState::Ready);
    assert!(lifecycle.is_degraded());
}

#[tokio::test]
async fn test_rebuild_publishes_new_engine() {
    let store = CountingRecordStore::new(records());
    let lifecycle = lifecycle_with(Arc::new(FlakyStorage::new()), Arc::new(NoEmbeddings));
    lifecycle.initialize(&store).await;

    store.push(record("odin", "Odin Arrays"));
    assert_eq!(lifecycle.rebuild(&store).await.unwrap(), 4);

    let results = lifecycle.search_fulltext("odin", 20).await.unwrap();
    assert_eq!(results[0].id(), "https://example.com/odin");
}

#[tokio::test]
async fn test_duplicate_records_in_store_are_indexed_once() {
    let mut duplicated = records();
    duplicated.push(record("rust", "Rust Ownership"));

    let lifecycle = lifecycle_with(Arc::new(FlakyStorage::new()), Arc::new(NoEmbeddings));
    lifecycle.initialize(&CountingRecordStore::new(duplicated)).await;

    assert_eq!(lifecycle.document_count().await, 3);
    assert_eq!(lifecycle.search_fulltext("rust", 20).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_embeddings_attach_vectors() {
    let lifecycle = lifecycle_with(Arc::new(FlakyStorage::new()), bag_of_words("bow-a"));
    lifecycle.initialize(&CountingRecordStore::new(records())).await;

    let stats = lifecycle.stats().await;
    assert!(stats.embeddings_enabled);
    assert_eq!(stats.model.as_deref(), Some("bow-a"));
    assert_eq!(stats.dimensions, Some(64));
    assert_eq!(stats.vectors, 3);

    let results = lifecycle.search_hybrid("comptime", 20).await.unwrap();
    assert_eq!(results[0].id(), "https://example.com/zig");
}

#[tokio::test]
async fn test_snapshot_from_other_model_is_rebuilt() {
    let storage = Arc::new(FlakyStorage::new());
    lifecycle_with(storage.clone(), bag_of_words("bow-a"))
        .initialize(&CountingRecordStore::new(records()))
        .await;

    let store = CountingRecordStore::new(records()[..2].to_vec());
    let lifecycle = lifecycle_with(storage.clone(), bag_of_words("bow-b"));
    lifecycle.initialize(&store).await;

    // the snapshot held 3 documents; the rebuild only sees 2
    assert_eq!(lifecycle.document_count().await, 2);
    assert_eq!(store.calls(), 1);
    assert_eq!(lifecycle.stats().await.model.as_deref(), Some("bow-b"));
}

#[tokio::test]
async fn test_vector_snapshot_restores_without_embedder() {
    let storage = Arc::new(FlakyStorage::new());
    lifecycle_with(storage.clone(), bag_of_words("bow-a"))
        .initialize(&CountingRecordStore::new(records()))
        .await;

    let store = CountingRecordStore::default();
    let lifecycle = lifecycle_with(storage, Arc::new(NoEmbeddings));
    lifecycle.initialize(&store).await;

    let stats = lifecycle.stats().await;
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.vectors, 3);
    assert!(!stats.embeddings_enabled);
    assert_eq!(store.calls(), 0);

    // no query vector, so hybrid ranks lexically
    let results = lifecycle.search_hybrid("channels", 20).await.unwrap();
    assert_eq!(results[0].id(), "https://example.com/go");
}

#[tokio::test]
async fn test_local_storage_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = IndexSettings::default();

    let first = IndexLifecycle::new(
        settings.clone(),
        Arc::new(LocalFileStorage::new(tmp.path())),
        Arc::new(NoEmbeddings),
    );
    first.initialize(&CountingRecordStore::new(records())).await;
    assert!(tmp.path().join(DEFAULT_INDEX_KEY).exists());

    let second = IndexLifecycle::new(
        settings,
        Arc::new(LocalFileStorage::new(tmp.path())),
        Arc::new(NoEmbeddings),
    );
    let store = CountingRecordStore::default();
    second.initialize(&store).await;

    assert_eq!(store.calls(), 0);
    for record in records() {
        let results = second.search_fulltext(&record.title, 20).await.unwrap();
        assert!(results.iter().any(|r| r.id() == record.id), "{} not restored", record.title);
    }
}

#[tokio::test]
async fn test_remote_storage_survives_restart() {
    let database = FakeD1::default();
    let remote = |database: &FakeD1| {
        Arc::new(RemoteRowStorage::new(database.clone(), DEFAULT_TABLE).unwrap())
    };

    let first = IndexLifecycle::new(
        IndexSettings::default(),
        remote(&database),
        Arc::new(NoEmbeddings),
    );
    first.initialize(&CountingRecordStore::new(records())).await;
    {
        let rows = database.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.contains_key(DEFAULT_INDEX_KEY));
    }

    let second = IndexLifecycle::new(
        IndexSettings::default(),
        remote(&database),
        Arc::new(NoEmbeddings),
    );
    let store = CountingRecordStore::default();
    second.initialize(&store).await;

    assert_eq!(store.calls(), 0);
    assert_eq!(second.document_count().await, 3);
    let results = second.search_fulltext("channels", 20).await.unwrap();
    assert_eq!(results[0].id(), "https://example.com/go");
}

#[tokio::test]
async fn test_stalled_remote_falls_back_to_rebuild() {
    // accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = HttpQueryClient::new(
        &format!("http://{addr}/query"),
        Some("secret".to_string()),
        Duration::from_millis(200),
    )
    .unwrap();
    let lifecycle = IndexLifecycle::new(
        IndexSettings::default(),
        Arc::new(RemoteRowStorage::new(client, DEFAULT_TABLE).unwrap()),
        Arc::new(NoEmbeddings),
    );
    let store = CountingRecordStore::new(records());

    tokio::time::timeout(Duration::from_secs(10), lifecycle.initialize(&store))
        .await
        .expect("initialize never finished");

    assert_eq!(lifecycle.state().await, LifecycleState::Ready);
    assert!(!lifecycle.is_degraded());
    assert_eq!(store.calls(), 1);
    assert_eq!(lifecycle.document_count().await, 3);
}
