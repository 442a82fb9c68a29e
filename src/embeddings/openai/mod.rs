#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::http::HttpTransport;
use super::{EmbeddingProvider, ProviderError, ProviderErrorKind, validate_embeddings};
use crate::config::EmbeddingConfig;
use crate::{DocuchatError, Result};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_DIMENSION: u32 = 1536;

/// Embedding provider backed by the OpenAI `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: Url,
    api_key: String,
    model: String,
    dimension: usize,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    /// Requires an API key, either from the configuration or `OPENAI_API_KEY`.
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .resolved_openai_api_key()
            .ok_or_else(|| {
                DocuchatError::Config(
                    "OPENAI_API_KEY environment variable is required".to_string(),
                )
            })?;

        let base_url = Self::parse_base_url(&config.openai_base_url)?;

        Ok(Self {
            base_url,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension as usize,
            transport: HttpTransport::default(),
        })
    }

    fn parse_base_url(raw: &str) -> Result<Url> {
        // A trailing slash keeps Url::join from replacing the last segment.
        let normalized = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{}/", raw)
        };
        Url::parse(&normalized)
            .map_err(|e| DocuchatError::Config(format!("Invalid OpenAI base URL {}: {}", raw, e)))
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.transport = self.transport.with_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.transport = self.transport.with_backoff(backoff);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl EmbeddingProvider for OpenAiProvider {
    #[inline]
    fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed_documents(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting {} embeddings from {}", texts.len(), self.base_url);

        let url = self.base_url.join("embeddings").map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Rejected,
                format!("Failed to build embeddings URL: {}", e),
            )
        })?;

        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Rejected,
                format!("Failed to serialize embeddings request: {}", e),
            )
        })?;

        let response_text =
            self.transport
                .post_json(url.as_str(), Some(&self.api_key), &request_json)?;

        let mut response: EmbeddingsResponse =
            serde_json::from_str(&response_text).map_err(|e| {
                ProviderError::new(
                    ProviderErrorKind::InvalidResponse,
                    format!("Failed to parse embeddings response: {}", e),
                )
            })?;

        response.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();

        validate_embeddings(texts.len(), self.dimension, &vectors)?;

        Ok(vectors)
    }
}
