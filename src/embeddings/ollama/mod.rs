
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::http::HttpTransport;
use super::{EmbeddingProvider, ProviderError, ProviderErrorKind, validate_embeddings};
use crate::config::EmbeddingConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: Url,
    model: String,
    dimension: usize,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaProvider {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .ollama
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.dimension as usize,
            transport: HttpTransport::default(),
        })
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

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.validate_model().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Validate that the configured model is available
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        debug!("Validating model: {}", self.model);

        let models = self.list_models().context("Failed to list models")?;

        if models.iter().any(|m| m.name == self.model) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .transport
            .get(url.as_str())
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }
}

impl EmbeddingProvider for OllamaProvider {
    #[inline]
    fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let url = self.base_url.join("/api/embed").map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Rejected,
                format!("Failed to build embedding URL: {}", e),
            )
        })?;

        let request = BatchEmbedRequest {
            model: &self.model,
            inputs: texts,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Rejected,
                format!("Failed to serialize embedding request: {}", e),
            )
        })?;

        let response_text = self.transport.post_json(url.as_str(), None, &request_json)?;

        let response: BatchEmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::InvalidResponse,
                format!("Failed to parse embedding response: {}", e),
            )
        })?;

        validate_embeddings(texts.len(), self.dimension, &response.embeddings)?;

        debug!(
            "Generated {} embeddings with {} dimensions",
            response.embeddings.len(),
            self.dimension
        );
        Ok(response.embeddings)
    }
}
