// Embedding manager
// Batches chunks through the provider, commits them to the store, answers similarity queries


use std::collections::HashSet;
use std::fmt::Write as _;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info};

use crate::chunking::Chunk;
use crate::config::Config;
use crate::database::{DocumentStore, DocumentSummary, NewEmbeddingRow, RankedChunk, open_store};
use crate::embeddings::{EmbeddingProvider, create_provider, validate_embeddings};
use crate::ranking::RankingStrategy;
use crate::{DocuchatError, Result};

/// Chunks sent to the provider per request
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Outcome of one document ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub filename: String,
    pub chunks_stored: usize,
    pub batches: usize,
    /// Rows of the previous generation that were removed
    pub replaced_rows: u64,
}

/// Backend-agnostic entry point for ingestion, search and document lifecycle.
///
/// Built explicitly from a store and a provider; nothing is looked up
/// globally, so tests can pass a stub provider and a temporary store.
pub struct EmbeddingManager {
    store: Box<dyn DocumentStore>,
    provider: Box<dyn EmbeddingProvider>,
    batch_size: usize,
    strategy: Option<RankingStrategy>,
    show_progress: bool,
}

impl EmbeddingManager {
    #[inline]
    pub fn new(store: Box<dyn DocumentStore>, provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            strategy: None,
            show_progress: false,
        }
    }

    /// Zero is treated as one.
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Draw a progress bar on an attended stderr while embedding.
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Open the configured store and provider. The caller still runs
    /// [`EmbeddingManager::initialize`].
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| DocuchatError::Config(e.to_string()))?;

        let provider = create_provider(config)?;
        let store = open_store(config).await?;

        Ok(Self::new(store, provider).with_batch_size(config.embedding.batch_size as usize))
    }

    #[inline]
    pub async fn initialize(&mut self) -> Result<RankingStrategy> {
        if self.provider.dimension() != self.store.dimension() {
            return Err(DocuchatError::Config(format!(
                "Provider model {} produces {} dimensions but the {} store expects {}",
                self.provider.model(),
                self.provider.dimension(),
                self.store.backend(),
                self.store.dimension()
            )));
        }

        let strategy = self.store.initialize().await?;
        self.strategy = Some(strategy);

        info!(
            "Embedding manager ready: {} store, {} ranking, model {}",
            self.store.backend(),
            strategy,
            self.provider.model()
        );
        Ok(strategy)
    }

    /// Release the store's connections.
    #[inline]
    pub async fn shutdown(self) {
        self.store.shutdown().await;
        debug!("Embedding manager shut down");
    }

    /// Ranking strategy chosen by the store, once initialized
    #[inline]
    pub fn strategy(&self) -> Option<RankingStrategy> {
        self.strategy
    }

    #[inline]
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed `chunks` and make them the only rows stored for `filename`.
    ///
    /// Every batch is embedded before anything is written; the store then
    /// swaps the old rows for the new ones in one step. A provider failure
    /// leaves the previous generation untouched. An empty `chunks` removes the
    /// document.
    #[inline]
    pub async fn store_document_embeddings(
        &self,
        chunks: &[Chunk],
        filename: &str,
    ) -> Result<IngestionReport> {
        self.ensure_initialized()?;

        if filename.trim().is_empty() {
            return Err(DocuchatError::Validation(
                "Filename must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in chunks {
            if !seen.insert(chunk.metadata.chunk_id) {
                return Err(DocuchatError::Validation(format!(
                    "Chunk id {} appears more than once in '{}'",
                    chunk.metadata.chunk_id, filename
                )));
            }
        }

        let dimension = self.store.dimension();
        let total_batches = chunks.len().div_ceil(self.batch_size);
        let bar = self.progress_bar(chunks.len(), filename);

        let mut staged: Vec<Vec<NewEmbeddingRow>> = Vec::with_capacity(total_batches);
        for (index, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

            debug!(
                "Embedding batch {}/{} of '{}' ({} chunks)",
                index + 1,
                total_batches,
                filename,
                texts.len()
            );

            let embeddings = self.provider.embed_documents(&texts)?;
            validate_embeddings(texts.len(), dimension, &embeddings)?;

            staged.push(
                batch
                    .iter()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| NewEmbeddingRow {
                        filename: filename.to_string(),
                        chunk_id: i64::from(chunk.metadata.chunk_id),
                        content: chunk.content.clone(),
                        embedding,
                        metadata: chunk.metadata_value(),
                    })
                    .collect(),
            );
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        let replaced_rows = self.store.replace_document(filename, &staged).await?;

        info!(
            "Stored {} chunks for '{}' in {} batches ({} rows replaced)",
            chunks.len(),
            filename,
            staged.len(),
            replaced_rows
        );

        Ok(IngestionReport {
            filename: filename.to_string(),
            chunks_stored: chunks.len(),
            batches: staged.len(),
            replaced_rows,
        })
    }

    /// The `k` stored chunks most similar to `query`, best first.
    #[inline]
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>> {
        self.ensure_initialized()?;

        if query.trim().is_empty() {
            return Err(DocuchatError::Validation(
                "Query text must not be empty".to_string(),
            ));
        }
        if k == 0 {
            return Err(DocuchatError::Validation(
                "k must be greater than zero".to_string(),
            ));
        }

        if self.store.count_rows().await? == 0 {
            debug!("Store is empty, skipping query embedding");
            return Ok(Vec::new());
        }

        let query_embedding = self.provider.embed_query(query)?;
        validate_embeddings(1, self.store.dimension(), std::slice::from_ref(&query_embedding))?;

        let results = self.store.rank_by_similarity(&query_embedding, k).await?;
        debug!("Similarity search returned {} chunks", results.len());
        Ok(results)
    }

    #[inline]
    pub async fn get_document_list(&self) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        self.store.list_filenames().await
    }

    #[inline]
    pub async fn document_summaries(&self) -> Result<Vec<DocumentSummary>> {
        self.ensure_initialized()?;
        self.store.document_summaries().await
    }

    /// Returns whether any rows existed for `filename`.
    #[inline]
    pub async fn delete_document(&self, filename: &str) -> Result<bool> {
        self.ensure_initialized()?;
        let deleted = self.store.delete_by_filename(filename).await?;
        if deleted > 0 {
            info!("Deleted document '{}' ({} chunks)", filename, deleted);
        } else {
            debug!("Document '{}' not found", filename);
        }
        Ok(deleted > 0)
    }

    #[inline]
    pub async fn delete_all_documents(&self) -> Result<u64> {
        self.ensure_initialized()?;
        let deleted = self.store.delete_all().await?;
        info!("Deleted all documents ({} chunks)", deleted);
        Ok(deleted)
    }

    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.store.optimize().await
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.strategy.is_none() {
            return Err(DocuchatError::Storage(
                "Embedding manager used before initialize()".to_string(),
            ));
        }
        Ok(())
    }

    fn progress_bar(&self, chunks: usize, filename: &str) -> ProgressBar {
        if !self.show_progress || !console::user_attended_stderr() {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(chunks as u64);
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding {msg}") {
            bar.set_style(style);
        }
        bar.set_message(filename.to_string());
        bar
    }
}

/// Render retrieved chunks as the context block handed to the answer model.
#[inline]
pub fn build_context(chunks: &[RankedChunk]) -> String {
    let mut context = String::new();
    for (index, chunk) in chunks.iter().enumerate() {
        if index > 0 {
            context.push('\n');
        }
        let _ = write!(
            context,
            "Document: {}\nRelevance: {:.3}\nContent: {}\n---",
            chunk.filename, chunk.similarity, chunk.content
        );
    }
    context
}
