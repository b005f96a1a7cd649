//! Optional embedding capability.
//!
//! Semantic vectors are an enhancement, never a requirement: an
//! [`EmbeddingProvider`] either hands out a ready [`Embedder`] or `None`, and
//! every caller treats `None` as a normal configuration.
//!
//! The fastembed-backed provider is compiled in with the `embeddings` feature
//! (enabled by default). Model files are downloaded on first use into
//! `<cache_dir>/models`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Default embedding model, small enough to load quickly on a server.
pub const DEFAULT_MODEL: &str = "bge-small-en-v1.5";

/// Default download timeout for model files (5 minutes)
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model initialization timed out after {0} seconds")]
    InitTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Turns text into a fixed-width vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Identity stamped into snapshots so a model change invalidates them.
    fn model_id(&self) -> [u8; 32] {
        model_id_hash(self.model_name())
    }
}

/// SHA256 of the model name.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Lazily constructs a shared embedder.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The embedder if one can be made available, otherwise `None`.
    ///
    /// Implementations cache the outcome; repeated calls are cheap.
    async fn try_init(&self) -> Option<Arc<dyn Embedder>>;

    /// Forget any cached embedder so the next `try_init` starts over.
    async fn reset(&self) {}
}

/// Provider for deployments without semantic search.
pub struct NoEmbeddings;

#[async_trait]
impl EmbeddingProvider for NoEmbeddings {
    async fn try_init(&self) -> Option<Arc<dyn Embedder>> {
        None
    }
}

/// Provider that always hands out the same embedder.
pub struct StaticEmbeddings(pub Arc<dyn Embedder>);

#[async_trait]
impl EmbeddingProvider for StaticEmbeddings {
    async fn try_init(&self) -> Option<Arc<dyn Embedder>> {
        Some(self.0.clone())
    }
}

/// Configuration for the embedding capability
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Enable or disable semantic vectors
    #[serde(default)]
    pub enabled: bool,

    /// Model name (e.g., "bge-small-en-v1.5")
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound for model download + load, in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: DEFAULT_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

/// fastembed-backed provider.
///
/// The model is built on a blocking thread the first time `try_init` is
/// called. A failure is logged once and remembered until `reset`.
pub struct FastembedProvider {
    config: EmbeddingsConfig,
    cache_dir: PathBuf,
    cached: Mutex<Option<Option<Arc<dyn Embedder>>>>,
}

impl FastembedProvider {
    pub fn new(config: EmbeddingsConfig, cache_dir: PathBuf) -> Self {
        Self {
            config,
            cache_dir,
            cached: Mutex::new(None),
        }
    }

    async fn load(&self) -> Option<Arc<dyn Embedder>> {
        if !self.config.enabled {
            log::info!("semantic embeddings disabled, using text relevance only");
            return None;
        }

        let timeout = Duration::from_secs(self.config.download_timeout_secs);
        match tokio::time::timeout(timeout, load_model(&self.config.model, &self.cache_dir)).await
        {
            Ok(Ok(embedder)) => {
                log::info!(
                    "loaded embedding model '{}' ({} dimensions)",
                    embedder.model_name(),
                    embedder.dimensions()
                );
                Some(embedder)
            }
            Ok(Err(err)) => {
                log::warn!("embeddings unavailable, continuing without vectors: {err}");
                None
            }
            Err(_) => {
                let err = EmbeddingError::InitTimeout(self.config.download_timeout_secs);
                log::warn!("embeddings unavailable, continuing without vectors: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FastembedProvider {
    async fn try_init(&self) -> Option<Arc<dyn Embedder>> {
        let mut cached = self.cached.lock().await;
        if let Some(outcome) = cached.as_ref() {
            return outcome.clone();
        }

        let outcome = self.load().await;
        *cached = Some(outcome.clone());
        outcome
    }

    async fn reset(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(feature = "embeddings")]
async fn load_model(
    model_name: &str,
    cache_dir: &std::path::Path,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let model_name = model_name.to_string();
    let cache_dir = cache_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        fastembed_model::FastembedModel::new(&model_name, cache_dir)
            .map(|model| Arc::new(model) as Arc<dyn Embedder>)
    })
    .await
    .map_err(|err| EmbeddingError::InitFailed(format!("model loader panicked: {err}")))?
}

#[cfg(not(feature = "embeddings"))]
async fn load_model(
    model_name: &str,
    _cache_dir: &std::path::Path,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Err(EmbeddingError::InitFailed(format!(
        "built without the `embeddings` feature, cannot load '{model_name}'"
    )))
}

#[cfg(feature = "embeddings")]
mod fastembed_model {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::{Embedder, EmbeddingError};

    /// Accepted names, matched case-insensitively. `-q` selects the
    /// quantized variant.
    const KNOWN_MODELS: &[(&str, EmbeddingModel)] = &[
        ("all-minilm-l6-v2", EmbeddingModel::AllMiniLML6V2),
        ("all-minilm-l6-v2-q", EmbeddingModel::AllMiniLML6V2Q),
        ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15),
        ("bge-small-en-v1.5-q", EmbeddingModel::BGESmallENV15Q),
        ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15),
        ("bge-base-en-v1.5-q", EmbeddingModel::BGEBaseENV15Q),
    ];

    pub(super) fn resolve_model(name: &str) -> Result<EmbeddingModel, EmbeddingError> {
        let wanted = name.to_lowercase();
        KNOWN_MODELS
            .iter()
            .find(|(known, _)| *known == wanted)
            .map(|(_, model)| model.clone())
            .ok_or_else(|| {
                let known: Vec<&str> = KNOWN_MODELS.iter().map(|(known, _)| *known).collect();
                EmbeddingError::InvalidModel(format!(
                    "'{name}' is not a supported model, pick one of: {}",
                    known.join(", ")
                ))
            })
    }

    /// A loaded fastembed model. `TextEmbedding::embed` takes `&mut self`.
    pub struct FastembedModel {
        model: Mutex<TextEmbedding>,
        model_name: String,
        dimensions: usize,
    }

    impl FastembedModel {
        /// Blocking: may download the model into `<cache_dir>/models`.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|err| {
                EmbeddingError::InitFailed(format!("cannot create {models_dir:?}: {err}"))
            })?;

            let options = InitOptions::new(resolve_model(model_name)?)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false);
            let model = TextEmbedding::try_new(options)
                .map_err(|err| EmbeddingError::InitFailed(err.to_string()))?;

            let mut loaded = Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
                dimensions: 0,
            };
            // width is only known after a first embedding
            loaded.dimensions = loaded
                .embed("dimensions")
                .map_err(|err| EmbeddingError::InitFailed(err.to_string()))?
                .len();

            log::debug!("loaded '{model_name}' ({} dimensions)", loaded.dimensions);
            Ok(loaded)
        }
    }

    impl Embedder for FastembedModel {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::EmbeddingFailed("model lock poisoned".to_string()))?;

            model
                .embed(vec![text], None)
                .map_err(|err| EmbeddingError::EmbeddingFailed(err.to_string()))?
                .pop()
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("empty embedding batch".to_string()))
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}
