
use super::models::{DocumentRecord, blob_to_embedding, embedding_to_blob};
use crate::database::{DocumentSummary, NewEmbeddingRow};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

pub struct SchemaQueries;

impl SchemaQueries {
    #[inline]
    pub async fn create_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                chunk_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (filename, chunk_id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create documents table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_filename ON documents(filename)")
            .execute(&mut *conn)
            .await
            .context("Failed to create filename index")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create store_meta table")?;

        Ok(())
    }

    #[inline]
    pub async fn get_meta(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM store_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("Failed to read store metadata '{}'", key))?;

        Ok(value)
    }

    #[inline]
    pub async fn set_meta_if_absent(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to write store metadata '{}'", key))?;

        Ok(())
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert rows on an open connection; the caller owns the transaction.
    #[inline]
    pub async fn insert_rows(conn: &mut SqliteConnection, rows: &[NewEmbeddingRow]) -> Result<u64> {
        let now = Utc::now();
        let mut inserted = 0;

        for row in rows {
            let metadata = serde_json::to_string(&row.metadata)
                .context("Failed to serialize chunk metadata")?;

            inserted += sqlx::query(
                "INSERT INTO documents (filename, chunk_id, content, embedding, metadata, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.filename)
            .bind(row.chunk_id)
            .bind(&row.content)
            .bind(embedding_to_blob(&row.embedding))
            .bind(metadata)
            .bind(now)
            .execute(&mut *conn)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert chunk {} of '{}'",
                    row.chunk_id, row.filename
                )
            })?
            .rows_affected();
        }

        debug!("Inserted {} rows", inserted);
        Ok(inserted)
    }

    #[inline]
    pub async fn delete_by_filename(conn: &mut SqliteConnection, filename: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE filename = ?")
            .bind(filename)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to delete document '{}'", filename))?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn delete_all(pool: &SqlitePool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents")
            .execute(pool)
            .await
            .context("Failed to delete all documents")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn list_filenames(pool: &SqlitePool) -> Result<Vec<String>> {
        let filenames = sqlx::query_scalar("SELECT DISTINCT filename FROM documents ORDER BY filename")
            .fetch_all(pool)
            .await
            .context("Failed to list document filenames")?;

        Ok(filenames)
    }

    #[inline]
    pub async fn summaries(pool: &SqlitePool) -> Result<Vec<DocumentSummary>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT filename, COUNT(*) FROM documents GROUP BY filename ORDER BY filename",
        )
        .fetch_all(pool)
        .await
        .context("Failed to summarize documents")?;

        Ok(rows
            .into_iter()
            .map(|(filename, chunk_count)| DocumentSummary {
                filename,
                chunk_count,
            })
            .collect())
    }

    #[inline]
    pub async fn rows_for_document(pool: &SqlitePool, filename: &str) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query_as::<_, DocumentRecord>(
            r#"
            SELECT id, filename, chunk_id, content, embedding, metadata, created_at
            FROM documents WHERE filename = ? ORDER BY chunk_id
            "#,
        )
        .bind(filename)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to load rows for '{}'", filename))?;

        Ok(rows)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count rows")?;

        Ok(count)
    }

    /// Every row as (content, metadata, filename, embedding), in insertion order.
    #[inline]
    pub async fn all_for_ranking(
        pool: &SqlitePool,
    ) -> Result<Vec<(String, String, String, Vec<f32>)>> {
        let rows: Vec<(String, String, String, Vec<u8>)> = sqlx::query_as(
            "SELECT content, metadata, filename, embedding FROM documents ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .context("Failed to load rows for ranking")?;

        Ok(rows
            .into_iter()
            .map(|(content, metadata, filename, blob)| {
                (content, metadata, filename, blob_to_embedding(&blob))
            })
            .collect())
    }
}
