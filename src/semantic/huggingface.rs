//! HuggingFace Inference API feature-extraction client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::embeddings::{check_dimensions, EmbeddingError, EmbeddingProvider};

pub struct HuggingFaceEmbedder {
    client: Client,
    endpoint: String,
    dimensions: usize,
}

impl HuggingFaceEmbedder {
    pub fn new(
        endpoint: &str,
        api_key: Option<&str>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| EmbeddingError::InitFailed("invalid HuggingFace API key".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            dimensions,
        })
    }
}

#[derive(Serialize)]
struct FeatureRequest<'a> {
    inputs: &'a str,
    options: FeatureOptions,
}

#[derive(Serialize)]
struct FeatureOptions {
    wait_for_model: bool,
    use_cache: bool,
}

/// Sentence-transformer pipelines answer with either a single vector or a
/// batch of one.
#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureResponse {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl FeatureResponse {
    fn into_vector(self) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            FeatureResponse::Flat(vector) => Ok(vector),
            FeatureResponse::Nested(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Format("empty batch".to_string())),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceEmbedder {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let request = FeatureRequest {
            inputs: text,
            options: FeatureOptions {
                wait_for_model: true,
                use_cache: true,
            },
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let parsed: FeatureResponse =
            serde_json::from_slice(&bytes).map_err(|e| EmbeddingError::Format(e.to_string()))?;

        check_dimensions(parsed.into_vector()?, self.dimensions)
    }
}
