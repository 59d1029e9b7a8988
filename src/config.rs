use crate::storage::{self, StorageManager};
use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, net::SocketAddr, path::Path};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Dimensionality of block embeddings (MiniLM family).
pub const EMBEDDING_DIMENSIONS: usize = 384;
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;
/// Model download timeout in seconds, local provider only
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_CHAT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4";
const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 120;

const DEFAULT_SEARCH_THRESHOLD: f32 = 0.5;
const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_FALLBACK_SIMILARITY: f32 = 0.3;
const DEFAULT_CONTEXT_WINDOW: i64 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Hosted feature-extraction endpoint
    HuggingFace,
    /// In-process fastembed model
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,

    /// Model name for the local provider (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Endpoint for the hosted provider
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            endpoint: default_embedding_endpoint(),
            dimensions: EMBEDDING_DIMENSIONS,
            timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::HuggingFace
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_endpoint() -> String {
    DEFAULT_EMBEDDING_ENDPOINT.to_string()
}

fn default_embedding_dimensions() -> usize {
    EMBEDDING_DIMENSIONS
}

fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

/// OpenAI-compatible chat completion service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base url, `/chat/completions` is appended
    #[serde(default = "default_chat_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: default_chat_endpoint(),
            model: default_chat_model(),
            temperature: None,
            timeout_secs: DEFAULT_CHAT_TIMEOUT_SECS,
        }
    }
}

fn default_chat_endpoint() -> String {
    DEFAULT_CHAT_ENDPOINT.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_chat_timeout_secs() -> u64 {
    DEFAULT_CHAT_TIMEOUT_SECS
}

/// Retrieval knobs for similarity search and context assembly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Vector matches must score strictly above this
    #[serde(default = "default_search_threshold")]
    pub threshold: f32,

    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Nominal score given to keyword fallback matches
    #[serde(default = "default_fallback_similarity")]
    pub fallback_similarity: f32,

    /// Neighbor blocks fetched on each side of a vector match
    #[serde(default = "default_context_window")]
    pub context_window: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SEARCH_THRESHOLD,
            limit: DEFAULT_SEARCH_LIMIT,
            fallback_similarity: DEFAULT_FALLBACK_SIMILARITY,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

fn default_search_threshold() -> f32 {
    DEFAULT_SEARCH_THRESHOLD
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_fallback_similarity() -> f32 {
    DEFAULT_FALLBACK_SIMILARITY
}

fn default_context_window() -> i64 {
    DEFAULT_CONTEXT_WINDOW
}

/// An API user. The bearer token authenticates requests as `id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    pub id: String,
    pub token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            users: Vec::new(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen
            .parse::<SocketAddr>()
            .with_context(|| format!("listen must be a socket address, got '{}'", self.listen))?;

        let search = &self.search;
        ensure!(
            (0.0..=1.0).contains(&search.threshold),
            "search.threshold must be between 0.0 and 1.0, got {}",
            search.threshold
        );
        ensure!(
            (0.0..=1.0).contains(&search.fallback_similarity),
            "search.fallback_similarity must be between 0.0 and 1.0, got {}",
            search.fallback_similarity
        );
        ensure!(search.limit > 0, "search.limit must be greater than 0");
        ensure!(
            search.context_window >= 0,
            "search.context_window must not be negative"
        );

        ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be greater than 0"
        );
        ensure!(
            self.embedding.timeout_secs > 0 && self.chat.timeout_secs > 0,
            "timeouts must be greater than 0"
        );
        url::Url::parse(&self.embedding.endpoint).context("embedding.endpoint is not a url")?;
        url::Url::parse(&self.chat.endpoint).context("chat.endpoint is not a url")?;

        let mut seen = HashSet::new();
        for (idx, user) in self.users.iter().enumerate() {
            let idx = idx + 1;
            ensure!(!user.id.trim().is_empty(), "user #{idx} has an empty id");
            ensure!(!user.token.trim().is_empty(), "user #{idx} has an empty token");
            ensure!(seen.insert(&user.id), "user '{}' is listed twice", user.id);
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("writing default config to {}", base_path.join(CONFIG_FILE).display());
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save(base_path)?;
        }

        Ok(config)
    }

    pub fn save(&self, base_path: &Path) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(base_path)?;
        store.write(CONFIG_FILE, serde_yml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
