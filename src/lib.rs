//! Search index for a growing collection of content records.
//!
//! The pieces, leaves first:
//!
//! - [`storage`]: where the serialized index lives (local file, remote row)
//! - [`embeddings`]: optional text-to-vector capability
//! - [`index`]: the in-memory engine and its snapshot codec
//! - [`lifecycle`]: restore/rebuild/persist of the one live engine
//! - [`search`]: the query surface with its fallback ladder
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use digest_search::embeddings::NoEmbeddings;
//! use digest_search::lifecycle::{IndexLifecycle, IndexSettings};
//! use digest_search::records::FileRecordStore;
//! use digest_search::search::SearchService;
//! use digest_search::storage::LocalFileStorage;
//!
//! # async fn demo() {
//! let lifecycle = Arc::new(IndexLifecycle::new(
//!     IndexSettings::default(),
//!     Arc::new(LocalFileStorage::new("/var/lib/digest")),
//!     Arc::new(NoEmbeddings),
//! ));
//! let service = SearchService::new(lifecycle, Arc::new(FileRecordStore::new("records.json")));
//!
//! service.initialize().await;
//! let results = service.search("rust ownership", None).await;
//! service.shutdown().await;
//! # }
//! ```

pub mod config;
pub mod embeddings;
pub mod index;
pub mod lifecycle;
pub mod records;
pub mod search;
pub mod storage;
pub mod web;

#[cfg(test)]
mod tests;
