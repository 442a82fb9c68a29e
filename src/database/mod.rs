// Database module
// Store capability interface shared by the SQLite, Postgres and LanceDB backends


pub mod lancedb;
pub mod postgres;
pub mod sqlite;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::ranking::RankingStrategy;
use crate::{DocuchatError, Result};

pub use self::lancedb::LanceStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Postgres,
    LanceDb,
}

impl fmt::Display for StoreBackend {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Postgres => write!(f, "postgres"),
            StoreBackend::LanceDb => write!(f, "lancedb"),
        }
    }
}

/// A chunk with its embedding, ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmbeddingRow {
    pub filename: String,
    pub chunk_id: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
}

/// A persisted chunk row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRow {
    /// Store-assigned, increasing with insertion order
    pub id: i64,
    pub filename: String,
    pub chunk_id: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// A retrieved chunk handed to the answer-generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub content: String,
    pub filename: String,
    pub metadata: Value,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub chunk_count: i64,
}

/// Durable storage for embedding rows.
///
/// Every variant keeps the same guarantees: a batch is written completely or
/// not at all, deletes report how many rows went away (0 for an unknown
/// filename), and filenames are listed distinct and ascending.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// Vector length this store accepts
    fn dimension(&self) -> usize;

    /// Create the schema if missing. Safe to call on an initialized store.
    ///
    /// Returns how similarity ranking will be performed.
    async fn initialize(&mut self) -> Result<RankingStrategy>;

    /// Write one batch for a single filename, atomically.
    async fn insert_batch(&self, rows: &[NewEmbeddingRow]) -> Result<u64>;

    /// Swap the stored rows of `filename` for `batches`.
    ///
    /// Returns the number of rows that were replaced. The default deletes and
    /// then inserts batch by batch; backends with transactions commit the
    /// whole swap at once.
    async fn replace_document(&self, filename: &str, batches: &[Vec<NewEmbeddingRow>]) -> Result<u64> {
        let replaced = self.delete_by_filename(filename).await?;
        for batch in batches {
            self.insert_batch(batch).await?;
        }
        Ok(replaced)
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<u64>;

    async fn delete_all(&self) -> Result<u64>;

    async fn list_filenames(&self) -> Result<Vec<String>>;

    async fn document_summaries(&self) -> Result<Vec<DocumentSummary>>;

    /// Rows of one document ordered by chunk position
    async fn document_rows(&self, filename: &str) -> Result<Vec<EmbeddingRow>>;

    async fn count_rows(&self) -> Result<u64>;

    /// At most `k` rows ordered by descending cosine similarity to `query`.
    async fn rank_by_similarity(&self, query: &[f32], k: usize) -> Result<Vec<RankedChunk>>;

    /// Backend housekeeping: compaction, statistics, deferred index builds.
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }

    /// Release pooled connections.
    async fn shutdown(&self);
}

/// Reject a batch that spans several filenames or carries wrong-sized vectors.
///
/// Returns the batch's filename, or `None` for an empty batch.
#[inline]
pub fn validate_batch(rows: &[NewEmbeddingRow], dimension: usize) -> Result<Option<&str>> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    for row in rows {
        if row.filename != first.filename {
            return Err(DocuchatError::Storage(format!(
                "Batch mixes filenames '{}' and '{}'",
                first.filename, row.filename
            )));
        }

        if row.embedding.len() != dimension {
            return Err(DocuchatError::Storage(format!(
                "Chunk {} of '{}' has {} embedding dimensions, store expects {}",
                row.chunk_id,
                row.filename,
                row.embedding.len(),
                dimension
            )));
        }
    }

    Ok(Some(first.filename.as_str()))
}

/// Reject rows that repeat a chunk id of the same document.
///
/// Backends without a `UNIQUE (filename, chunk_id)` constraint call this
/// before writing.
#[inline]
pub fn validate_unique_chunks(rows: &[NewEmbeddingRow]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert((row.filename.as_str(), row.chunk_id)) {
            return Err(DocuchatError::Storage(format!(
                "Chunk {} of '{}' appears more than once",
                row.chunk_id, row.filename
            )));
        }
    }
    Ok(())
}

/// Parse stored metadata JSON; unreadable metadata degrades to an empty object.
#[inline]
pub fn parse_metadata(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

/// Reject a query vector the store could not compare against its rows.
#[inline]
pub fn validate_query(query: &[f32], dimension: usize) -> Result<()> {
    if query.len() != dimension {
        return Err(DocuchatError::Validation(format!(
            "Query embedding has {} dimensions, store expects {}",
            query.len(),
            dimension
        )));
    }
    Ok(())
}

/// Fold a backend failure, with its context chain, into a storage error.
#[inline]
pub fn storage_error(error: anyhow::Error) -> DocuchatError {
    DocuchatError::Storage(format!("{:#}", error))
}

/// Open the configured backend. The caller runs [`DocumentStore::initialize`].
#[inline]
pub async fn open_store(config: &Config) -> Result<Box<dyn DocumentStore>> {
    let dimension = config.embedding.dimension as usize;
    debug!(
        "Opening {} store with {} dimensions",
        config.store.backend, dimension
    );

    let store: Box<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Sqlite => Box::new(
            SqliteStore::open(config.sqlite_path(), dimension, config.store.max_connections)
                .await?,
        ),
        StoreBackend::Postgres => {
            let url = config.store.resolved_database_url().ok_or_else(|| {
                DocuchatError::Config("DATABASE_URL environment variable is required".to_string())
            })?;
            Box::new(PostgresStore::connect(&url, dimension, config.store.max_connections).await?)
        }
        StoreBackend::LanceDb => Box::new(LanceStore::open(config.lancedb_path(), dimension).await?),
    };

    info!("Opened {} document store", store.backend());
    Ok(store)
}
