use crate::{
    app::service::AppService,
    config::{Config, IndexBackend},
    records::JsonRecordStore,
    semantic::{
        build_embedder, Embedder, IndexClient, IndexSynchronizer, MemoryStore, QdrantStore,
        SimilaritySearch, VectorStore, VECTORS_FILE,
    },
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Build the record store, embedder and index client from config and
    /// wire them into an application service.
    ///
    /// Must run inside a tokio runtime; the service spawns its sync workers.
    pub async fn create_app_service(paths: &AppPaths) -> Result<AppService> {
        let config = Self::create_config(&paths.base_path)?;

        let records = Arc::new(
            JsonRecordStore::load(&paths.base_path).context("failed to open record store")?,
        );

        let embedder = Self::create_embedder(&config, paths).await?;
        let store = Self::create_vector_store(&config, paths, embedder.as_ref())?;

        let index = IndexClient::new(
            store,
            embedder.dimensions(),
            Duration::from_millis(config.index.timeout_ms),
        );
        Self::open_collection(&index, &config).await?;

        let sync = Arc::new(IndexSynchronizer::new(
            records.clone(),
            index.clone(),
            embedder.clone(),
        ));
        let search = SimilaritySearch::new(index, embedder.clone());

        Ok(AppService::new(
            config,
            records,
            sync,
            search,
            embedder.name().to_string(),
        ))
    }

    /// Make sure the collection exists. An unreachable store is only
    /// logged: record mutations still commit and their index updates are
    /// deferred, while searches report the store as unavailable.
    async fn open_collection(index: &IndexClient, config: &Config) -> Result<()> {
        match index.ensure_collection().await {
            Ok(_) => {
                index.flush().await.context("failed to persist vector index")?;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                log::warn!(
                    "vector store unavailable, index updates are deferred: {}",
                    e
                );
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!(
                    "failed to open collection '{}' with {} dimensions",
                    config.index.collection,
                    index.dimension()
                )
            }),
        }
    }

    /// Get application paths, creating the base directory
    pub fn get_paths() -> Result<AppPaths> {
        let paths = AppPaths::from_base(Self::get_base_path()?);

        std::fs::create_dir_all(&paths.base_path)
            .context("Failed to create application base directory")?;

        Ok(paths)
    }

    /// Load configuration, creating it with defaults when missing
    pub fn create_config(base_path: &str) -> Result<Config> {
        Config::load_with(base_path).context("failed to load config")
    }

    async fn create_embedder(config: &Config, paths: &AppPaths) -> Result<Arc<dyn Embedder>> {
        let embedding_config = config.embedding.clone();
        let cache_dir = PathBuf::from(&paths.base_path);

        // model download and load are blocking
        let embedder =
            tokio::task::spawn_blocking(move || build_embedder(&embedding_config, cache_dir))
                .await
                .context("embedder initialization task failed")??;

        log::debug!(
            "using embedder '{}' with {} dimensions",
            embedder.name(),
            embedder.dimensions()
        );
        Ok(embedder)
    }

    fn create_vector_store(
        config: &Config,
        paths: &AppPaths,
        embedder: &dyn Embedder,
    ) -> Result<Arc<dyn VectorStore>> {
        match config.index.backend {
            IndexBackend::Local => {
                let store = MemoryStore::open(paths.vectors_path.clone(), embedder.model_id_hash())
                    .context("failed to open local vector index")?;
                Ok(Arc::new(store))
            }
            IndexBackend::Qdrant => {
                log::info!(
                    "Using qdrant at {} (collection '{}')",
                    config.index.url,
                    config.index.collection
                );
                Ok(Arc::new(QdrantStore::new(&config.index)?))
            }
        }
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var("CONVO_INDEX_BASE_PATH") {
            return Ok(base_path);
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(format!("{}/.local/share/convo-index", home.to_string_lossy()))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: String,
    pub vectors_path: PathBuf,
}

impl AppPaths {
    pub fn from_base(base_path: String) -> Self {
        let vectors_path = PathBuf::from(&base_path).join(VECTORS_FILE);
        Self {
            base_path,
            vectors_path,
        }
    }
}
