use crate::storage::{BackendLocal, StorageManager};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_COLLECTION: &str = "conversations";
const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
const DEFAULT_INDEX_TIMEOUT_MS: u64 = 10_000;

/// Default embedding model for the fastembed provider
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
/// Dimensions produced by the hash provider
const DEFAULT_HASH_DIMENSIONS: usize = 384;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_SYNC_WORKERS: u16 = 4;
const DEFAULT_SYNC_MAX_RETRIES: u8 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

const DEFAULT_SEED_BATCH_SIZE: usize = 50;
const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process index persisted to `vectors.bin`
    #[default]
    Local,
    /// Remote Qdrant server over REST
    Qdrant,
}

/// Vector index connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Timeout applied to every index call
    #[serde(default = "default_index_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            url: default_qdrant_url(),
            api_key: None,
            collection: default_collection(),
            timeout_ms: DEFAULT_INDEX_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic feature hashing, no model download
    #[default]
    Hash,
    /// Local ONNX model through fastembed
    Fastembed,
}

/// Configuration for embedding generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Model name for the fastembed provider (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector length of the hash provider
    #[serde(default = "default_hash_dimensions")]
    pub dimensions: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            dimensions: DEFAULT_HASH_DIMENSIONS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of ordered queue workers; events for one id always land on
    /// the same worker
    #[serde(default = "default_sync_workers")]
    pub workers: u16,

    #[serde(default = "default_sync_max_retries")]
    pub max_retries: u8,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_SYNC_WORKERS,
            max_retries: DEFAULT_SYNC_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeederConfig {
    #[serde(default = "default_seed_batch_size")]
    pub batch_size: usize,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SEED_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Minimum similarity score, unset means no threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_SEARCH_LIMIT,
            min_score: None,
        }
    }
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_index_timeout_ms() -> u64 {
    DEFAULT_INDEX_TIMEOUT_MS
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_hash_dimensions() -> usize {
    DEFAULT_HASH_DIMENSIONS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_sync_workers() -> u16 {
    DEFAULT_SYNC_WORKERS
}

fn default_sync_max_retries() -> u8 {
    DEFAULT_SYNC_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_seed_batch_size() -> usize {
    DEFAULT_SEED_BATCH_SIZE
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub seeder: SeederConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync.workers == 0 {
            bail!("sync.workers must be greater than 0");
        }

        if self.seeder.batch_size == 0 {
            bail!("seeder.batch_size must be greater than 0");
        }

        if self.index.timeout_ms == 0 {
            bail!("index.timeout_ms must be greater than 0");
        }

        if self.index.collection.trim().is_empty() {
            bail!("index.collection must not be empty");
        }

        if self.embedding.provider == EmbeddingProvider::Hash && self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be greater than 0");
        }

        if self.embedding.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }

        if let Some(min_score) = self.search.min_score {
            if !(-1.0..=1.0).contains(&min_score) {
                bail!("search.min_score must be between -1.0 and 1.0, got {min_score}");
            }
        }

        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_str().unwrap();

        let config = Config::load_with(base).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.index.backend, IndexBackend::Local);
        assert_eq!(config.seeder.batch_size, 50);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.base_path(), base);
    }

    #[test]
    fn test_partial_config_is_filled_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "index:\n  backend: qdrant\n  collection: chats\nseeder:\n  batch_size: 7\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();

        assert_eq!(config.index.backend, IndexBackend::Qdrant);
        assert_eq!(config.index.collection, "chats");
        assert_eq!(config.index.url, DEFAULT_QDRANT_URL);
        assert_eq!(config.seeder.batch_size, 7);
        assert_eq!(config.sync.workers, DEFAULT_SYNC_WORKERS);

        // upgraded file now carries every field
        let rewritten = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(rewritten.contains("timeout_ms"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.sync.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.seeder.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.min_score = Some(1.5);
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
