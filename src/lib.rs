use thiserror::Error;

use crate::embeddings::ProviderError;

pub type Result<T> = std::result::Result<T, DocuchatError>;

#[derive(Error, Debug)]
pub enum DocuchatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`DocuchatError`], for callers that translate
/// failures into user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Provider,
    Storage,
    Validation,
    Io,
    Other,
}

impl DocuchatError {
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        match *self {
            DocuchatError::Config(_) => ErrorKind::Configuration,
            DocuchatError::Provider(_) => ErrorKind::Provider,
            DocuchatError::Storage(_) => ErrorKind::Storage,
            DocuchatError::Validation(_) => ErrorKind::Validation,
            DocuchatError::Io(_) => ErrorKind::Io,
            DocuchatError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only rate limits and transient provider failures qualify.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            DocuchatError::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub mod chunking;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod manager;
pub mod ranking;
