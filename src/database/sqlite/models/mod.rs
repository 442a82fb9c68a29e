
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::database::{EmbeddingRow, parse_metadata};

/// A `documents` row as stored: embedding as a little-endian f32 blob,
/// metadata as JSON text.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DocumentRecord {
    pub id: i64,
    pub filename: String,
    pub chunk_id: i64,
    pub content: String,
    pub embedding: Vec<u8>,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

impl From<DocumentRecord> for EmbeddingRow {
    #[inline]
    fn from(record: DocumentRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename,
            chunk_id: record.chunk_id,
            content: record.content,
            embedding: blob_to_embedding(&record.embedding),
            metadata: parse_metadata(&record.metadata),
            created_at: record.created_at,
        }
    }
}

#[inline]
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

#[inline]
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
