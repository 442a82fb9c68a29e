// Embeddings module
// Provider contract plus the Ollama and OpenAI HTTP implementations


pub mod http;
pub mod ollama;
pub mod openai;

use std::fmt;

use thiserror::Error;

use crate::config::{Config, EmbeddingProviderKind};
use crate::{DocuchatError, Result};

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Converts text into fixed-length vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// each with [`EmbeddingProvider::dimension`] components. Calls block the
/// caller until the remote side answers.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier used for every request
    fn model(&self) -> &str;

    /// Number of components in every returned vector
    fn dimension(&self) -> usize;

    fn embed_documents(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    #[inline]
    fn embed_query(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_documents(&[text.to_string()])?;
        vectors.pop().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::InvalidResponse,
                "Provider returned no embedding for query",
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    Transient,
    InvalidCredentials,
    QuotaExhausted,
    InvalidResponse,
    Rejected,
}

impl fmt::Display for ProviderErrorKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProviderErrorKind::RateLimited => write!(f, "rate limited"),
            ProviderErrorKind::Transient => write!(f, "transient failure"),
            ProviderErrorKind::InvalidCredentials => write!(f, "invalid credentials"),
            ProviderErrorKind::QuotaExhausted => write!(f, "quota exhausted"),
            ProviderErrorKind::InvalidResponse => write!(f, "invalid response"),
            ProviderErrorKind::Rejected => write!(f, "request rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    #[inline]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Rate limits and transient failures may succeed on a later attempt;
    /// everything else needs operator action.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited | ProviderErrorKind::Transient
        )
    }

    /// Classify a non-success HTTP status and its response body.
    #[inline]
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            429 if body.contains("insufficient_quota") => ProviderErrorKind::QuotaExhausted,
            429 => ProviderErrorKind::RateLimited,
            401 | 403 => ProviderErrorKind::InvalidCredentials,
            500..=599 => ProviderErrorKind::Transient,
            _ => ProviderErrorKind::Rejected,
        };

        let detail = body.trim();
        let message = if detail.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, detail)
        };

        Self::new(kind, message)
    }
}

/// Check a provider response against the request: one vector per input and
/// `dimension` components each.
#[inline]
pub fn validate_embeddings(
    expected_count: usize,
    dimension: usize,
    vectors: &[Vec<f32>],
) -> std::result::Result<(), ProviderError> {
    if vectors.len() != expected_count {
        return Err(ProviderError::new(
            ProviderErrorKind::InvalidResponse,
            format!(
                "Mismatch between request and response counts: {} vs {}",
                expected_count,
                vectors.len()
            ),
        ));
    }

    if let Some((index, vector)) = vectors
        .iter()
        .enumerate()
        .find(|(_, v)| v.len() != dimension)
    {
        return Err(ProviderError::new(
            ProviderErrorKind::InvalidResponse,
            format!(
                "Embedding {} has {} dimensions, expected {}",
                index,
                vector.len(),
                dimension
            ),
        ));
    }

    Ok(())
}

/// Build the provider selected in the configuration.
#[inline]
pub fn create_provider(config: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    match config.embedding.provider {
        EmbeddingProviderKind::Ollama => {
            let provider = OllamaProvider::new(&config.embedding)
                .map_err(|e| DocuchatError::Config(format!("{:#}", e)))?;
            Ok(Box::new(provider))
        }
        EmbeddingProviderKind::OpenAi => Ok(Box::new(OpenAiProvider::new(&config.embedding)?)),
    }
}
