// Postgres backend
// Native cosine ranking through pgvector, REAL[] storage when the extension is unavailable


pub mod url;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use tracing::{debug, info, warn};

use self::url::normalize_database_url;
use crate::database::{
    DocumentStore, DocumentSummary, EmbeddingRow, NewEmbeddingRow, RankedChunk, StoreBackend,
    validate_batch, validate_query,
};
use crate::ranking::{Candidate, RankingStrategy, rank_top_k};
use crate::{DocuchatError, Result};

/// Rows required before an ivfflat index is worth training.
pub const IVFFLAT_MIN_ROWS: u64 = 1000;

const IVFFLAT_MAX_LISTS: u64 = 1000;

/// How the `embedding` column is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingColumn {
    /// pgvector `vector(D)`
    Vector,
    /// Plain `REAL[]`, ranked in process
    RealArray,
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    dimension: usize,
    column: Option<EmbeddingColumn>,
}

fn storage(context: &str, error: sqlx::Error) -> DocuchatError {
    DocuchatError::Storage(format!("{}: {}", context, error))
}

impl PostgresStore {
    /// Connect using any accepted scheme spelling of `database_url`.
    #[inline]
    pub async fn connect(database_url: &str, dimension: usize, max_connections: u32) -> Result<Self> {
        let normalized = normalize_database_url(database_url);
        if normalized.recognized {
            debug!(
                "Connecting to Postgres with sslmode={}",
                normalized.sslmode.as_deref().unwrap_or("default")
            );
        } else {
            warn!("Database URL was not recognized as a Postgres URL, using it as given");
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(&normalized.url)
            .await
            .map_err(|e| storage("Failed to connect to Postgres", e))?;

        Ok(Self::from_pool(pool, dimension))
    }

    #[inline]
    pub fn from_pool(pool: PgPool, dimension: usize) -> Self {
        Self {
            pool,
            dimension,
            column: None,
        }
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Column layout detected by [`DocumentStore::initialize`].
    #[inline]
    pub fn embedding_column(&self) -> Option<EmbeddingColumn> {
        self.column
    }

    fn column(&self) -> Result<EmbeddingColumn> {
        self.column.ok_or_else(|| {
            DocuchatError::Storage("Postgres store used before initialize()".to_string())
        })
    }

    /// Train the ivfflat cosine index once enough rows exist.
    ///
    /// Returns whether the index now exists. Failures are logged, never raised;
    /// ranking stays exact without the index.
    #[inline]
    pub async fn build_vector_index(&self) -> Result<bool> {
        if self.column()? != EmbeddingColumn::Vector {
            return Ok(false);
        }

        let rows = self.count_rows().await?;
        if rows < IVFFLAT_MIN_ROWS {
            debug!(
                "Skipping ivfflat index: {} rows, need {}",
                rows, IVFFLAT_MIN_ROWS
            );
            return Ok(false);
        }

        let lists = (rows / 1000).clamp(1, IVFFLAT_MAX_LISTS);
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS idx_documents_embedding ON documents USING ivfflat (embedding vector_cosine_ops) WITH (lists = {})",
            lists
        );

        match sqlx::query(&ddl).execute(&self.pool).await {
            Ok(_) => {
                info!("ivfflat index ready with {} lists", lists);
                Ok(true)
            }
            Err(e) => {
                warn!("Could not create ivfflat index, searching without it: {}", e);
                Ok(false)
            }
        }
    }

    async fn existing_column(&self) -> Result<Option<String>> {
        sqlx::query_scalar(
            r#"
            SELECT format_type(a.atttypid, a.atttypmod)
            FROM pg_attribute a
            WHERE a.attrelid = to_regclass('documents')
              AND a.attname = 'embedding'
              AND NOT a.attisdropped
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to inspect documents table", e))
    }

    async fn enable_vector_extension(&self) -> bool {
        match sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "pgvector extension unavailable, falling back to in-process ranking: {}",
                    e
                );
                false
            }
        }
    }

    async fn insert_rows(
        &self,
        conn: &mut PgConnection,
        column: EmbeddingColumn,
        rows: &[NewEmbeddingRow],
    ) -> Result<u64> {
        let now = Utc::now();
        let mut inserted = 0;

        for row in rows {
            let query = sqlx::query(
                "INSERT INTO documents (filename, chunk_id, content, embedding, metadata, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&row.filename)
            .bind(row.chunk_id)
            .bind(&row.content);

            let query = match column {
                EmbeddingColumn::Vector => query.bind(Vector::from(row.embedding.clone())),
                EmbeddingColumn::RealArray => query.bind(&row.embedding),
            };

            inserted += query
                .bind(Json(&row.metadata))
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    storage(
                        &format!("Failed to insert chunk {} of '{}'", row.chunk_id, row.filename),
                        e,
                    )
                })?
                .rows_affected();
        }

        Ok(inserted)
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| storage("Failed to begin transaction", e))
    }
}

/// Parse `vector(1536)` into its dimension.
fn vector_type_dimension(type_name: &str) -> Option<usize> {
    type_name
        .strip_prefix("vector(")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

#[async_trait]
impl DocumentStore for PostgresStore {
    #[inline]
    fn backend(&self) -> StoreBackend {
        StoreBackend::Postgres
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn initialize(&mut self) -> Result<RankingStrategy> {
        info!("Initializing Postgres store");

        let column = match self.existing_column().await? {
            Some(type_name) if type_name.starts_with("vector") => {
                match vector_type_dimension(&type_name) {
                    Some(dimension) if dimension != self.dimension => {
                        return Err(DocuchatError::Storage(format!(
                            "documents.embedding is {}, configured dimension is {}",
                            type_name, self.dimension
                        )));
                    }
                    _ => EmbeddingColumn::Vector,
                }
            }
            Some(type_name) if type_name == "real[]" => EmbeddingColumn::RealArray,
            Some(type_name) => {
                return Err(DocuchatError::Storage(format!(
                    "documents.embedding has unsupported type {}",
                    type_name
                )));
            }
            None => {
                if self.enable_vector_extension().await {
                    EmbeddingColumn::Vector
                } else {
                    EmbeddingColumn::RealArray
                }
            }
        };

        let column_type = match column {
            EmbeddingColumn::Vector => format!("vector({})", self.dimension),
            EmbeddingColumn::RealArray => "REAL[]".to_string(),
        };

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id BIGSERIAL PRIMARY KEY,
                filename TEXT NOT NULL,
                chunk_id BIGINT NOT NULL,
                content TEXT NOT NULL,
                embedding {} NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (filename, chunk_id)
            )
            "#,
            column_type
        );

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| storage("Failed to create documents table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_filename ON documents (filename)")
            .execute(&self.pool)
            .await
            .map_err(|e| storage("Failed to create filename index", e))?;

        self.column = Some(column);
        self.build_vector_index().await?;

        let strategy = match column {
            EmbeddingColumn::Vector => RankingStrategy::Native,
            EmbeddingColumn::RealArray => RankingStrategy::InProcess,
        };
        info!("Postgres store ready, {} ranking", strategy);
        Ok(strategy)
    }

    #[inline]
    async fn insert_batch(&self, rows: &[NewEmbeddingRow]) -> Result<u64> {
        let column = self.column()?;
        if validate_batch(rows, self.dimension)?.is_none() {
            return Ok(0);
        }

        let mut tx = self.begin().await?;
        let inserted = self.insert_rows(&mut tx, column, rows).await?;
        tx.commit()
            .await
            .map_err(|e| storage("Failed to commit batch", e))?;

        debug!("Inserted {} rows", inserted);
        Ok(inserted)
    }

    #[inline]
    async fn replace_document(
        &self,
        filename: &str,
        batches: &[Vec<NewEmbeddingRow>],
    ) -> Result<u64> {
        let column = self.column()?;
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

        let mut tx = self.begin().await?;
        let replaced = sqlx::query("DELETE FROM documents WHERE filename = $1")
            .bind(filename)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage(&format!("Failed to delete document '{}'", filename), e))?
            .rows_affected();

        let mut inserted = 0;
        for batch in batches {
            inserted += self.insert_rows(&mut tx, column, batch).await?;
        }
        tx.commit()
            .await
            .map_err(|e| storage("Failed to commit document replacement", e))?;

        info!(
            "Stored {} rows for '{}', replacing {}",
            inserted, filename, replaced
        );
        Ok(replaced)
    }

    #[inline]
    async fn delete_by_filename(&self, filename: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE filename = $1")
            .bind(filename)
            .execute(&self.pool)
            .await
            .map_err(|e| storage(&format!("Failed to delete document '{}'", filename), e))?;

        Ok(result.rows_affected())
    }

    #[inline]
    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await
            .map_err(|e| storage("Failed to delete all documents", e))?;

        Ok(result.rows_affected())
    }

    #[inline]
    async fn list_filenames(&self) -> Result<Vec<String>> {
        // byte order, matching the other backends whatever the database collation
        sqlx::query_scalar(
            r#"SELECT filename FROM documents GROUP BY filename ORDER BY filename COLLATE "C""#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list documents", e))
    }

    #[inline]
    async fn document_summaries(&self) -> Result<Vec<DocumentSummary>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT filename, COUNT(*) FROM documents GROUP BY filename ORDER BY filename COLLATE "C""#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to summarize documents", e))?;

        Ok(rows
            .into_iter()
            .map(|(filename, chunk_count)| DocumentSummary {
                filename,
                chunk_count,
            })
            .collect())
    }

    #[inline]
    async fn document_rows(&self, filename: &str) -> Result<Vec<EmbeddingRow>> {
        let column = self.column()?;
        let rows = sqlx::query(
            r#"
            SELECT id, filename, chunk_id, content, embedding, metadata, created_at
            FROM documents WHERE filename = $1 ORDER BY chunk_id
            "#,
        )
        .bind(filename)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage(&format!("Failed to load rows for '{}'", filename), e))?;

        rows.iter()
            .map(|row| {
                let embedding = match column {
                    EmbeddingColumn::Vector => row.try_get::<Vector, _>("embedding")?.to_vec(),
                    EmbeddingColumn::RealArray => row.try_get::<Vec<f32>, _>("embedding")?,
                };
                Ok(EmbeddingRow {
                    id: row.try_get("id")?,
                    filename: row.try_get("filename")?,
                    chunk_id: row.try_get("chunk_id")?,
                    content: row.try_get("content")?,
                    embedding,
                    metadata: row.try_get::<Json<Value>, _>("metadata")?.0,
                    created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| storage("Failed to decode document row", e))
    }

    #[inline]
    async fn count_rows(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage("Failed to count rows", e))?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[inline]
    async fn rank_by_similarity(&self, query: &[f32], k: usize) -> Result<Vec<RankedChunk>> {
        validate_query(query, self.dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        match self.column()? {
            EmbeddingColumn::Vector => {
                let rows = sqlx::query(
                    r#"
                    SELECT content, metadata, filename, 1 - distance AS similarity
                    FROM (
                        SELECT id, content, metadata, filename, embedding <=> $1 AS distance
                        FROM documents
                        ORDER BY embedding <=> $1
                        LIMIT $2
                    ) nearest
                    ORDER BY distance, id
                    "#,
                )
                .bind(Vector::from(query.to_vec()))
                .bind(i64::try_from(k).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| storage("Similarity query failed", e))?;

                rows.iter()
                    .map(|row| {
                        // pgvector yields NaN for zero-magnitude vectors
                        let similarity: Option<f64> = row.try_get("similarity")?;
                        let similarity = similarity.filter(|s| s.is_finite()).unwrap_or(0.0);
                        Ok(RankedChunk {
                            content: row.try_get("content")?,
                            filename: row.try_get("filename")?,
                            metadata: row.try_get::<Json<Value>, _>("metadata")?.0,
                            similarity: similarity as f32,
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                    .map_err(|e| storage("Failed to decode ranked row", e))
            }
            EmbeddingColumn::RealArray => {
                let rows: Vec<(String, Json<Value>, String, Vec<f32>)> = sqlx::query_as(
                    "SELECT content, metadata, filename, embedding FROM documents ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await
                .map_err(|e| storage("Failed to load rows for ranking", e))?;

                let candidates = rows
                    .into_iter()
                    .map(|(content, metadata, filename, embedding)| Candidate {
                        content,
                        filename,
                        metadata: metadata.0,
                        embedding,
                    })
                    .collect();

                Ok(rank_top_k(query, candidates, k))
            }
        }
    }

    #[inline]
    async fn optimize(&self) -> Result<()> {
        sqlx::query("ANALYZE documents")
            .execute(&self.pool)
            .await
            .map_err(|e| storage("Failed to analyze documents", e))?;
        self.build_vector_index().await?;
        Ok(())
    }

    #[inline]
    async fn shutdown(&self) {
        self.pool.close().await;
        debug!("Closed Postgres pool");
    }
}
