//! Embedding providers.
//!
//! Every provider returns vectors of a fixed length (384 for the MiniLM
//! family). Empty input is rejected; callers are expected to skip it.

use async_trait::async_trait;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding input is empty")]
    EmptyInput,

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected embedding response: {0}")]
    Format(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed one non-empty text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

pub fn check_dimensions(embedding: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            got: embedding.len(),
        });
    }
    Ok(embedding)
}

#[cfg(feature = "local-embeddings")]
mod local {
    use super::{check_dimensions, EmbeddingError, EmbeddingProvider};
    use async_trait::async_trait;
    use fastembed::{InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// In-process fastembed model.
    ///
    /// The model is downloaded and loaded on first use, on the blocking
    /// pool. fastembed's `embed()` takes `&mut self`, hence the Mutex.
    #[derive(Clone)]
    pub struct LocalEmbedder {
        model_name: String,
        cache_dir: PathBuf,
        dimensions: usize,
        /// Bounds the first call, which may download the model
        download_timeout: Duration,
        model: Arc<OnceCell<Mutex<TextEmbedding>>>,
    }

    impl LocalEmbedder {
        /// Models are cached in the `models/` subdirectory of `cache_dir`.
        pub fn new(
            model_name: &str,
            cache_dir: PathBuf,
            dimensions: usize,
            download_timeout: Duration,
        ) -> Result<Self, EmbeddingError> {
            // fail fast on typos instead of on the first request
            parse_model_name(model_name)?;

            Ok(Self {
                model_name: model_name.to_string(),
                cache_dir,
                dimensions,
                download_timeout,
                model: Arc::new(OnceCell::new()),
            })
        }

        fn load(&self) -> Result<&Mutex<TextEmbedding>, EmbeddingError> {
            self.model.get_or_try_init(|| {
                log::info!("loading embedding model '{}'", self.model_name);

                let models_dir = self.cache_dir.join("models");
                std::fs::create_dir_all(&models_dir).map_err(|e| {
                    EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
                })?;

                let options = InitOptions::new(parse_model_name(&self.model_name)?)
                    .with_cache_dir(models_dir)
                    .with_show_download_progress(true);

                let model = TextEmbedding::try_new(options)
                    .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

                Ok(Mutex::new(model))
            })
        }

        fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut model = self.load()?.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalEmbedder {
        fn name(&self) -> &str {
            &self.model_name
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.trim().is_empty() {
                return Err(EmbeddingError::EmptyInput);
            }

            let loaded = self.model.get().is_some();
            let this = self.clone();
            let text = text.to_string();
            let task = tokio::task::spawn_blocking(move || this.embed_blocking(&text));

            let joined = if loaded {
                task.await
            } else {
                tokio::time::timeout(self.download_timeout, task)
                    .await
                    .map_err(|_| {
                        EmbeddingError::InitFailed(format!(
                            "model '{}' did not load within {:?}",
                            self.model_name, self.download_timeout
                        ))
                    })?
            };
            let embedding =
                joined.map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))??;

            check_dimensions(embedding, self.dimensions)
        }
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported 384-dimension models: all-MiniLM-L6-v2, paraphrase-multilingual-MiniLM-L12-v2, bge-small-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

}
