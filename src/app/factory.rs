use crate::{
    app::service::App,
    chat::OpenAiChat,
    config::{Config, EmbeddingProviderKind},
    semantic::{EmbeddingProvider, HuggingFaceEmbedder},
    storage,
    store::BackendJson,
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Build the application from the config and data in `paths`.
    pub fn create_app(paths: &AppPaths) -> Result<App> {
        let mut config = Config::load_with(&paths.base_path)?;
        if let Ok(listen) = std::env::var("BLOCKPAD_LISTEN") {
            config.listen = listen;
            config.validate()?;
        }

        if config.users.is_empty() {
            log::warn!("no users configured, every API request will be rejected");
        }

        let storage_mgr = storage::BackendLocal::new(&paths.base_path)
            .context("Failed to open data directory")?;
        let store = BackendJson::load(Arc::new(storage_mgr)).context("Failed to load store")?;

        let embedder = Self::create_embedder(&config, paths)?;
        log::info!(
            "embedding provider: {} ({} dims)",
            embedder.name(),
            embedder.dimensions()
        );
        let chat = OpenAiChat::new(
            &config.chat.endpoint,
            env_secret("OPENAI_API_KEY").as_deref(),
            Duration::from_secs(config.chat.timeout_secs),
        )
        .context("Failed to create chat client")?;

        Ok(App::new(config, Arc::new(store), embedder, Arc::new(chat)))
    }

    fn create_embedder(config: &Config, paths: &AppPaths) -> Result<Arc<dyn EmbeddingProvider>> {
        let embedding = &config.embedding;
        match embedding.provider {
            EmbeddingProviderKind::HuggingFace => {
                let key = env_secret("HUGGINGFACE_API_KEY");
                if key.is_none() {
                    log::warn!("HUGGINGFACE_API_KEY is not set");
                }
                let embedder = HuggingFaceEmbedder::new(
                    &embedding.endpoint,
                    key.as_deref(),
                    embedding.dimensions,
                    Duration::from_secs(embedding.timeout_secs),
                )?;
                Ok(Arc::new(embedder))
            }
            #[cfg(feature = "local-embeddings")]
            EmbeddingProviderKind::Local => {
                let embedder = crate::semantic::LocalEmbedder::new(
                    &embedding.model,
                    paths.base_path.clone(),
                    embedding.dimensions,
                    Duration::from_secs(embedding.download_timeout_secs),
                )?;
                Ok(Arc::new(embedder))
            }
            #[cfg(not(feature = "local-embeddings"))]
            EmbeddingProviderKind::Local => {
                let _ = paths;
                anyhow::bail!("local embeddings require the `local-embeddings` feature")
            }
        }
    }

    /// Get application paths with validation
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        // Ensure base directory exists
        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("BLOCKPAD_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/blockpad"))
    }
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
}
