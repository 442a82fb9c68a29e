// LanceDB vector database module
// Document rows with their embeddings in a local Lance table, ranked by cosine distance

#[cfg(test)]
mod tests;

pub mod records;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use arrow::array::RecordBatchIterator;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, info, warn};

use self::records::{
    VECTOR_COLUMN, batch_filenames, batch_ids, batch_to_ranked, batch_to_rows, documents_schema,
    quote_literal, rows_to_batch, vector_dimension,
};
use crate::database::{
    DocumentStore, DocumentSummary, EmbeddingRow, NewEmbeddingRow, RankedChunk, StoreBackend,
    validate_batch, validate_query, validate_unique_chunks,
};
use crate::ranking::RankingStrategy;
use crate::{DocuchatError, Result};

/// Rows needed before an IVF-PQ index can be trained.
pub const INDEX_MIN_ROWS: usize = 256;

const TABLE_NAME: &str = "documents";

fn storage(context: &str, error: impl std::fmt::Display) -> DocuchatError {
    DocuchatError::Storage(format!("{}: {}", context, error))
}

fn filename_predicate(filename: &str) -> String {
    format!("filename = {}", quote_literal(filename))
}

/// Embedding rows in a LanceDB table, searched natively.
pub struct LanceStore {
    connection: Connection,
    path: PathBuf,
    dimension: usize,
    table: Option<Table>,
    next_id: AtomicI64,
}

impl LanceStore {
    #[inline]
    pub async fn open<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening LanceDB at path: {}", path.display());

        std::fs::create_dir_all(&path).map_err(|e| {
            storage(
                &format!("Failed to create vector database directory {}", path.display()),
                e,
            )
        })?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| storage("Failed to connect to LanceDB", e))?;

        Ok(Self {
            connection,
            path,
            dimension,
            table: None,
            next_id: AtomicI64::new(1),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> Result<&Table> {
        self.table.as_ref().ok_or_else(|| {
            DocuchatError::Storage("LanceDB store used before initialize()".to_string())
        })
    }

    async fn open_or_create_table(&self) -> Result<Table> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| storage("Failed to list tables", e))?;

        if !table_names.iter().any(|name| name == TABLE_NAME) {
            info!(
                "Creating {} table with {} dimensions",
                TABLE_NAME, self.dimension
            );
            return self
                .connection
                .create_empty_table(TABLE_NAME, documents_schema(self.dimension)?)
                .execute()
                .await
                .map_err(|e| storage("Failed to create table", e));
        }

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| storage("Failed to open table", e))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| storage("Failed to get table schema", e))?;

        match vector_dimension(&schema) {
            Some(dimension) if dimension == self.dimension => Ok(table),
            Some(dimension) => Err(DocuchatError::Storage(format!(
                "Table at {} holds {}-dimensional vectors, configured dimension is {}",
                self.path.display(),
                dimension,
                self.dimension
            ))),
            None => Err(DocuchatError::Storage(
                "Could not find vector column or determine dimension".to_string(),
            )),
        }
    }

    /// Read every row matching `filter`, optionally projecting columns.
    async fn scan(&self, filter: Option<String>, columns: Option<&[&str]>) -> Result<Vec<RecordBatch>> {
        let table = self.table()?;

        let count = table
            .count_rows(filter.clone())
            .await
            .map_err(|e| storage("Failed to count rows", e))?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut query = table.query().limit(count);
        if let Some(filter) = filter {
            query = query.only_if(filter);
        }
        if let Some(columns) = columns {
            query = query.select(Select::columns(columns));
        }

        query
            .execute()
            .await
            .map_err(|e| storage("Failed to execute scan", e))?
            .try_collect()
            .await
            .map_err(|e| storage("Failed to read result stream", e))
    }

    async fn count_matching(&self, filter: Option<String>) -> Result<u64> {
        let count = self
            .table()?
            .count_rows(filter)
            .await
            .map_err(|e| storage("Failed to count rows", e))?;

        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    fn reserve_ids(&self, count: usize) -> i64 {
        self.next_id
            .fetch_add(i64::try_from(count).unwrap_or(i64::MAX), Ordering::SeqCst)
    }

    /// Train the cosine IVF-PQ index when the table is large enough and has none.
    ///
    /// Returns whether an index exists afterwards. Failures are logged; search
    /// stays exact without the index.
    #[inline]
    pub async fn ensure_vector_index(&self) -> Result<bool> {
        let table = self.table()?;

        let indices = table
            .list_indices()
            .await
            .map_err(|e| storage("Failed to list indices", e))?;
        if indices
            .iter()
            .any(|index| index.columns.iter().any(|c| c == VECTOR_COLUMN))
        {
            return Ok(true);
        }

        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| storage("Failed to count rows", e))?;
        if rows < INDEX_MIN_ROWS {
            debug!(
                "Skipping vector index: {} rows, need {}",
                rows, INDEX_MIN_ROWS
            );
            return Ok(false);
        }

        let index = Index::IvfPq(IvfPqIndexBuilder::default().distance_type(DistanceType::Cosine));
        match table.create_index(&[VECTOR_COLUMN], index).execute().await {
            Ok(()) => {
                info!("Vector index created over {} rows", rows);
                Ok(true)
            }
            Err(e) => {
                warn!("Failed to create vector index, searching without it: {}", e);
                Ok(false)
            }
        }
    }

    async fn add_batch(&self, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        self.table()?
            .add(reader)
            .execute()
            .await
            .map_err(|e| storage("Failed to insert embeddings", e))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for LanceStore {
    #[inline]
    fn backend(&self) -> StoreBackend {
        StoreBackend::LanceDb
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn initialize(&mut self) -> Result<RankingStrategy> {
        let table = self.open_or_create_table().await?;
        self.table = Some(table);

        let max_id = self
            .scan(None, Some(&["id"]))
            .await?
            .iter()
            .map(batch_ids)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0);
        self.next_id.store(max_id + 1, Ordering::SeqCst);

        self.ensure_vector_index().await?;

        info!("LanceDB store ready at {}", self.path.display());
        Ok(RankingStrategy::Native)
    }

    #[inline]
    async fn insert_batch(&self, rows: &[NewEmbeddingRow]) -> Result<u64> {
        let Some(filename) = validate_batch(rows, self.dimension)? else {
            return Ok(0);
        };
        validate_unique_chunks(rows)?;

        let chunk_ids = rows
            .iter()
            .map(|row| row.chunk_id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let existing = self
            .count_matching(Some(format!(
                "{} AND chunk_id IN ({})",
                filename_predicate(filename),
                chunk_ids
            )))
            .await?;
        if existing > 0 {
            return Err(DocuchatError::Storage(format!(
                "{} chunks of '{}' are already stored",
                existing, filename
            )));
        }

        let batch = rows_to_batch(rows, self.reserve_ids(rows.len()), self.dimension, Utc::now())?;
        self.add_batch(batch).await?;

        debug!("Stored batch of {} embeddings", rows.len());
        Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
    }

    /// Swap a document's rows in a single Lance commit.
    ///
    /// New rows carry fresh ids, so none match the target; rows of `filename`
    /// not present in the source are deleted in the same merge.
    #[inline]
    async fn replace_document(
        &self,
        filename: &str,
        batches: &[Vec<NewEmbeddingRow>],
    ) -> Result<u64> {
        let rows: Vec<NewEmbeddingRow> = batches.iter().flatten().cloned().collect();
        if let Some(batch_filename) = validate_batch(&rows, self.dimension)?
            && batch_filename != filename
        {
            return Err(DocuchatError::Storage(format!(
                "Batch for '{}' submitted while replacing '{}'",
                batch_filename, filename
            )));
        }
        validate_unique_chunks(&rows)?;

        let predicate = filename_predicate(filename);
        let replaced = self.count_matching(Some(predicate.clone())).await?;

        if rows.is_empty() {
            if replaced > 0 {
                self.table()?
                    .delete(&predicate)
                    .await
                    .map_err(|e| storage(&format!("Failed to delete '{}'", filename), e))?;
            }
            return Ok(replaced);
        }

        let batch = rows_to_batch(&rows, self.reserve_ids(rows.len()), self.dimension, Utc::now())?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let mut merge = self.table()?.merge_insert(&["id"]);
        merge
            .when_not_matched_insert_all()
            .when_not_matched_by_source_delete(Some(predicate));
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| storage(&format!("Failed to replace '{}'", filename), e))?;

        info!(
            "Stored {} rows for '{}', replacing {}",
            rows.len(),
            filename,
            replaced
        );
        Ok(replaced)
    }

    #[inline]
    async fn delete_by_filename(&self, filename: &str) -> Result<u64> {
        let predicate = filename_predicate(filename);

        // delete() does not report a row count
        let deleted = self.count_matching(Some(predicate.clone())).await?;
        if deleted > 0 {
            self.table()?
                .delete(&predicate)
                .await
                .map_err(|e| storage(&format!("Failed to delete '{}'", filename), e))?;
        }

        info!("Deleted {} embeddings for '{}'", deleted, filename);
        Ok(deleted)
    }

    #[inline]
    async fn delete_all(&self) -> Result<u64> {
        let deleted = self.count_matching(None).await?;
        if deleted > 0 {
            self.table()?
                .delete("true")
                .await
                .map_err(|e| storage("Failed to delete all embeddings", e))?;
        }
        Ok(deleted)
    }

    #[inline]
    async fn list_filenames(&self) -> Result<Vec<String>> {
        let mut filenames = BTreeSet::new();
        for batch in self.scan(None, Some(&["filename"])).await? {
            filenames.extend(batch_filenames(&batch)?);
        }
        Ok(filenames.into_iter().collect())
    }

    #[inline]
    async fn document_summaries(&self) -> Result<Vec<DocumentSummary>> {
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for batch in self.scan(None, Some(&["filename"])).await? {
            for filename in batch_filenames(&batch)? {
                *counts.entry(filename).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(filename, chunk_count)| DocumentSummary {
                filename,
                chunk_count,
            })
            .collect())
    }

    #[inline]
    async fn document_rows(&self, filename: &str) -> Result<Vec<EmbeddingRow>> {
        let mut rows = Vec::new();
        for batch in self.scan(Some(filename_predicate(filename)), None).await? {
            rows.extend(batch_to_rows(&batch)?);
        }
        rows.sort_by_key(|row| row.chunk_id);
        Ok(rows)
    }

    #[inline]
    async fn count_rows(&self) -> Result<u64> {
        self.count_matching(None).await
    }

    #[inline]
    async fn rank_by_similarity(&self, query: &[f32], k: usize) -> Result<Vec<RankedChunk>> {
        validate_query(query, self.dimension)?;
        if k == 0 || self.count_matching(None).await? == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = self
            .table()?
            .vector_search(query)
            .map_err(|e| storage("Failed to create vector search", e))?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| storage("Failed to execute search", e))?
            .try_collect()
            .await
            .map_err(|e| storage("Failed to read result stream", e))?;

        let mut ranked = Vec::new();
        for batch in &batches {
            ranked.extend(batch_to_ranked(batch)?);
        }
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        ranked.truncate(k);

        debug!("Vector search returned {} rows", ranked.len());
        Ok(ranked)
    }

    #[inline]
    async fn optimize(&self) -> Result<()> {
        self.table()?
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| storage("Failed to optimize table", e))?;
        self.ensure_vector_index().await?;

        info!("Vector database optimization completed");
        Ok(())
    }

    #[inline]
    async fn shutdown(&self) {
        debug!("Closing LanceDB store at {}", self.path.display());
    }
}
