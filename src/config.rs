use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embeddings::{EmbeddingProvider, EmbeddingsConfig, FastembedProvider};
use crate::index::{EngineOptions, DEFAULT_VECTOR_THRESHOLD};
use crate::index::hybrid::DEFAULT_SEMANTIC_WEIGHT;
use crate::lifecycle::{IndexSettings, DEFAULT_INDEX_KEY};
use crate::records::{FileRecordStore, RecordStore};
use crate::search::DEFAULT_LIMIT;
use crate::storage::{
    HttpQueryClient, LocalFileStorage, RemoteRowStorage, SnapshotStorage, StorageError,
    DEFAULT_TABLE, DEFAULT_TIMEOUT_SECS,
};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_RECORDS_PATH: &str = "records.json";

/// Environment variable consulted when `storage.token` is not set
pub const REMOTE_TOKEN_ENV: &str = "DIGEST_SEARCH_REMOTE_TOKEN";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config file is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Remote,
}

/// Where index snapshots are kept
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,

    /// Local snapshot directory, relative to the base path. Defaults to the
    /// base path itself.
    #[serde(default)]
    pub dir: Option<String>,

    /// Remote query endpoint URL
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Remote bearer token
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_table")]
    pub table: String,

    /// Remote request timeout. A stalled endpoint counts as unavailable
    /// after this long.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Local,
            dir: None,
            endpoint: None,
            token: None,
            table: DEFAULT_TABLE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Logical snapshot key (file name or row id)
    #[serde(default = "default_index_key")]
    pub index_key: String,

    /// JSON or CSV export of the record store, relative to the base path
    #[serde(default = "default_records_path")]
    pub records_path: String,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Weight of vector similarity in hybrid ranking [0.0, 1.0]
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    /// Minimum cosine similarity for semantic matches [0.0, 1.0]
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f32,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_key: default_index_key(),
            records_path: default_records_path(),
            default_limit: DEFAULT_LIMIT,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            vector_threshold: DEFAULT_VECTOR_THRESHOLD,
            storage: StorageConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_index_key() -> String {
    DEFAULT_INDEX_KEY.to_string()
}

fn default_records_path() -> String {
    DEFAULT_RECORDS_PATH.to_string()
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_semantic_weight() -> f32 {
    DEFAULT_SEMANTIC_WEIGHT
}

fn default_vector_threshold() -> f32 {
    DEFAULT_VECTOR_THRESHOLD
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.index_key.trim().is_empty() {
            return Err(ConfigError::Invalid("index_key must not be empty".to_string()));
        }

        if self.default_limit == 0 {
            return Err(ConfigError::Invalid(
                "default_limit must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.semantic_weight) {
            return Err(ConfigError::Invalid(format!(
                "semantic_weight must be between 0.0 and 1.0, got {}",
                self.semantic_weight
            )));
        }

        if !(0.0..=1.0).contains(&self.vector_threshold) {
            return Err(ConfigError::Invalid(format!(
                "vector_threshold must be between 0.0 and 1.0, got {}",
                self.vector_threshold
            )));
        }

        if self.embeddings.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embeddings.download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.storage.kind == StorageKind::Remote {
            let endpoint = self.storage.endpoint.as_deref().unwrap_or_default();
            if let Err(err) = url::Url::parse(endpoint) {
                return Err(ConfigError::Invalid(format!(
                    "storage.endpoint must be a valid url when storage.kind is remote, \
                     got {endpoint:?}: {err}"
                )));
            }

            if self.storage.timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "storage.timeout_secs must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first if it
    /// does not exist.
    pub async fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let store = LocalFileStorage::new(base_path);

        if !store.exists(CONFIG_FILE).await? {
            let defaults = serde_yml::to_string(&Self::default())?;
            store.write(CONFIG_FILE, defaults.as_bytes()).await?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE).await?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case new fields were added
        if config_str != serde_yml::to_string(&config)? {
            config.save().await?;
        }

        Ok(config)
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        let store = LocalFileStorage::new(&self.base_path);

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes()).await?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            index_key: self.index_key.clone(),
            engine: EngineOptions {
                semantic_weight: self.semantic_weight,
                vector_threshold: self.vector_threshold,
            },
        }
    }

    pub fn build_storage(&self) -> Result<Arc<dyn SnapshotStorage>, ConfigError> {
        match self.storage.kind {
            StorageKind::Local => {
                let dir = match &self.storage.dir {
                    Some(dir) => self.base_path.join(dir),
                    None => self.base_path.clone(),
                };
                log::debug!("storing index snapshots in {dir:?}");
                Ok(Arc::new(LocalFileStorage::new(dir)))
            }
            StorageKind::Remote => {
                let endpoint = self.storage.endpoint.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(
                        "storage.endpoint is required for remote storage".to_string(),
                    )
                })?;
                let token = self
                    .storage
                    .token
                    .clone()
                    .or_else(|| std::env::var(REMOTE_TOKEN_ENV).ok());
                if token.is_none() {
                    log::warn!(
                        "no token for remote storage, set storage.token or {REMOTE_TOKEN_ENV}"
                    );
                }

                let timeout = Duration::from_secs(self.storage.timeout_secs);
                let client = HttpQueryClient::new(endpoint, token, timeout)?;
                let storage = RemoteRowStorage::new(client, &self.storage.table)?;
                log::debug!("storing index snapshots in remote table '{}'", storage.table());
                Ok(Arc::new(storage))
            }
        }
    }

    pub fn build_embedding_provider(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::new(FastembedProvider::new(
            self.embeddings.clone(),
            self.base_path.clone(),
        ))
    }

    pub fn build_record_store(&self) -> Arc<dyn RecordStore> {
        Arc::new(FileRecordStore::new(self.base_path.join(&self.records_path)))
    }
}
