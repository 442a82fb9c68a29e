use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::database::sqlite::queries::{DocumentQueries, SchemaQueries};
use crate::database::{
    DocumentStore, DocumentSummary, EmbeddingRow, NewEmbeddingRow, RankedChunk, StoreBackend,
    parse_metadata, storage_error, validate_batch, validate_query,
};
use crate::ranking::{Candidate, RankingStrategy, rank_top_k};
use crate::{DocuchatError, Result};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

const DIMENSION_KEY: &str = "embedding_dimension";

/// Embedding rows in a local SQLite file, ranked in process.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
    path: PathBuf,
    dimension: usize,
}

impl SqliteStore {
    #[inline]
    pub async fn open<P: AsRef<Path>>(
        path: P,
        dimension: usize,
        max_connections: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                DocuchatError::Storage(format!(
                    "Failed to open SQLite database {}: {}",
                    path.display(),
                    e
                ))
            })?;

        debug!("Opened SQLite pool at {}", path.display());
        Ok(Self {
            pool,
            path,
            dimension,
        })
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| DocuchatError::Storage(format!("Failed to begin transaction: {}", e)))
    }
}

fn commit_error(e: sqlx::Error) -> DocuchatError {
    DocuchatError::Storage(format!("Failed to commit transaction: {}", e))
}

#[async_trait]
impl DocumentStore for SqliteStore {
    #[inline]
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn initialize(&mut self) -> Result<RankingStrategy> {
        info!("Initializing SQLite store at {}", self.path.display());

        let mut tx = self.begin().await?;
        SchemaQueries::create_schema(&mut tx)
            .await
            .map_err(storage_error)?;

        match SchemaQueries::get_meta(&mut tx, DIMENSION_KEY)
            .await
            .map_err(storage_error)?
        {
            Some(stored) if stored != self.dimension.to_string() => {
                return Err(DocuchatError::Storage(format!(
                    "Store at {} holds {}-dimensional embeddings, configured dimension is {}",
                    self.path.display(),
                    stored,
                    self.dimension
                )));
            }
            Some(_) => {}
            None => {
                SchemaQueries::set_meta_if_absent(&mut tx, DIMENSION_KEY, &self.dimension.to_string())
                    .await
                    .map_err(storage_error)?;
            }
        }

        tx.commit().await.map_err(commit_error)?;

        debug!("SQLite schema ready, ranking in process");
        Ok(RankingStrategy::InProcess)
    }

    #[inline]
    async fn insert_batch(&self, rows: &[NewEmbeddingRow]) -> Result<u64> {
        if validate_batch(rows, self.dimension)?.is_none() {
            return Ok(0);
        }

        let mut tx = self.begin().await?;
        let inserted = DocumentQueries::insert_rows(&mut tx, rows)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(commit_error)?;

        Ok(inserted)
    }

    #[inline]
    async fn replace_document(
        &self,
        filename: &str,
        batches: &[Vec<NewEmbeddingRow>],
    ) -> Result<u64> {
        for batch in batches {
            if let Some(batch_filename) = validate_batch(batch, self.dimension)?
                && batch_filename != filename
            {
                return Err(DocuchatError::Storage(format!(
                    "Batch for '{}' submitted while replacing '{}'",
                    batch_filename, filename
                )));
            }
        }

        // Dropping the transaction on any error rolls it back.
        let mut tx = self.begin().await?;
        let replaced = DocumentQueries::delete_by_filename(&mut tx, filename)
            .await
            .map_err(storage_error)?;

        let mut inserted = 0;
        for batch in batches {
            inserted += DocumentQueries::insert_rows(&mut tx, batch)
                .await
                .map_err(storage_error)?;
        }
        tx.commit().await.map_err(commit_error)?;

        if replaced > 0 {
            info!(
                "Replaced {} rows of '{}' with {} new rows",
                replaced, filename, inserted
            );
        }
        Ok(replaced)
    }

    #[inline]
    async fn delete_by_filename(&self, filename: &str) -> Result<u64> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            DocuchatError::Storage(format!("Failed to acquire connection: {}", e))
        })?;
        DocumentQueries::delete_by_filename(&mut conn, filename)
            .await
            .map_err(storage_error)
    }

    #[inline]
    async fn delete_all(&self) -> Result<u64> {
        DocumentQueries::delete_all(&self.pool)
            .await
            .map_err(storage_error)
    }

    #[inline]
    async fn list_filenames(&self) -> Result<Vec<String>> {
        DocumentQueries::list_filenames(&self.pool)
            .await
            .map_err(storage_error)
    }

    #[inline]
    async fn document_summaries(&self) -> Result<Vec<DocumentSummary>> {
        DocumentQueries::summaries(&self.pool)
            .await
            .map_err(storage_error)
    }

    #[inline]
    async fn document_rows(&self, filename: &str) -> Result<Vec<EmbeddingRow>> {
        let records = DocumentQueries::rows_for_document(&self.pool, filename)
            .await
            .map_err(storage_error)?;

        Ok(records.into_iter().map(EmbeddingRow::from).collect())
    }

    #[inline]
    async fn count_rows(&self) -> Result<u64> {
        let count = DocumentQueries::count(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[inline]
    async fn rank_by_similarity(&self, query: &[f32], k: usize) -> Result<Vec<RankedChunk>> {
        validate_query(query, self.dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = DocumentQueries::all_for_ranking(&self.pool)
            .await
            .map_err(storage_error)?;

        let candidates: Vec<Candidate> = rows
            .into_iter()
            .filter_map(|(content, metadata, filename, embedding)| {
                if embedding.len() != self.dimension {
                    warn!(
                        "Skipping row of '{}' with {} dimensions",
                        filename,
                        embedding.len()
                    );
                    return None;
                }
                Some(Candidate {
                    content,
                    filename,
                    metadata: parse_metadata(&metadata),
                    embedding,
                })
            })
            .collect();

        Ok(rank_top_k(query, candidates, k))
    }

    /// Reclaim space and refresh planner statistics.
    #[inline]
    async fn optimize(&self) -> Result<()> {
        info!("Optimizing SQLite store");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| DocuchatError::Storage(format!("Failed to vacuum database: {}", e)))?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .map_err(|e| DocuchatError::Storage(format!("Failed to analyze database: {}", e)))?;

        debug!("SQLite optimization completed");
        Ok(())
    }

    #[inline]
    async fn shutdown(&self) {
        self.pool.close().await;
        debug!("Closed SQLite pool at {}", self.path.display());
    }
}
