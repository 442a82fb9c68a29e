// Arrow conversion for the LanceDB documents table


use std::sync::Arc;

use arrow::array::{Array, FixedSizeListArray, Float32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};

use crate::database::{EmbeddingRow, NewEmbeddingRow, RankedChunk, parse_metadata};
use crate::{DocuchatError, Result};

pub const VECTOR_COLUMN: &str = "vector";
pub const DISTANCE_COLUMN: &str = "_distance";

#[inline]
pub fn documents_schema(dimension: usize) -> Result<SchemaRef> {
    let list_size = i32::try_from(dimension).map_err(|_| {
        DocuchatError::Storage(format!("Embedding dimension {} is too large", dimension))
    })?;

    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("filename", DataType::Utf8, false),
        Field::new("chunk_id", DataType::Int64, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                list_size,
            ),
            false,
        ),
    ])))
}

/// Dimension of the vector column in an existing table schema.
#[inline]
pub fn vector_dimension(schema: &Schema) -> Option<usize> {
    schema
        .field_with_name(VECTOR_COLUMN)
        .ok()
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
}

/// Build one record batch; `first_id` is assigned to the first row and
/// incremented per row.
#[inline]
pub fn rows_to_batch(
    rows: &[NewEmbeddingRow],
    first_id: i64,
    dimension: usize,
    created_at: DateTime<Utc>,
) -> Result<RecordBatch> {
    let schema = documents_schema(dimension)?;
    let created_at = created_at.to_rfc3339();

    let mut ids = Vec::with_capacity(rows.len());
    let mut metadata = Vec::with_capacity(rows.len());
    let mut flat_values = Vec::with_capacity(rows.len() * dimension);

    let mut next_id = first_id;
    for row in rows {
        if row.embedding.len() != dimension {
            return Err(DocuchatError::Storage(format!(
                "Chunk {} of '{}' has {} embedding dimensions, table expects {}",
                row.chunk_id,
                row.filename,
                row.embedding.len(),
                dimension
            )));
        }
        ids.push(next_id);
        next_id += 1;
        metadata.push(serde_json::to_string(&row.metadata).map_err(|e| {
            DocuchatError::Storage(format!("Failed to serialize chunk metadata: {}", e))
        })?);
        flat_values.extend_from_slice(&row.embedding);
    }

    let list_size = i32::try_from(dimension).unwrap_or(i32::MAX);
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    let vectors = FixedSizeListArray::try_new(
        item_field,
        list_size,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| DocuchatError::Storage(format!("Failed to create vector array: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.filename.as_str()),
        )),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.chunk_id))),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.content.as_str()),
        )),
        Arc::new(StringArray::from(metadata)),
        Arc::new(StringArray::from_iter_values(
            std::iter::repeat_n(created_at.as_str(), rows.len()),
        )),
        Arc::new(vectors),
    ];

    RecordBatch::try_new(schema, arrays)
        .map_err(|e| DocuchatError::Storage(format!("Failed to create record batch: {}", e)))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| DocuchatError::Storage(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| DocuchatError::Storage(format!("Invalid {} column type", name)))
}

#[inline]
pub fn batch_filenames(batch: &RecordBatch) -> Result<Vec<String>> {
    let filenames = column::<StringArray>(batch, "filename")?;
    Ok((0..batch.num_rows())
        .map(|row| filenames.value(row).to_string())
        .collect())
}

#[inline]
pub fn batch_ids(batch: &RecordBatch) -> Result<Vec<i64>> {
    let ids = column::<Int64Array>(batch, "id")?;
    Ok(ids.values().to_vec())
}

#[inline]
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<EmbeddingRow>> {
    let ids = column::<Int64Array>(batch, "id")?;
    let filenames = column::<StringArray>(batch, "filename")?;
    let chunk_ids = column::<Int64Array>(batch, "chunk_id")?;
    let contents = column::<StringArray>(batch, "content")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    let created_ats = column::<StringArray>(batch, "created_at")?;
    let vectors = column::<FixedSizeListArray>(batch, VECTOR_COLUMN)?;

    (0..batch.num_rows())
        .map(|row| {
            let vector = vectors.value(row);
            let values = vector
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| DocuchatError::Storage("Invalid vector item type".to_string()))?;

            Ok(EmbeddingRow {
                id: ids.value(row),
                filename: filenames.value(row).to_string(),
                chunk_id: chunk_ids.value(row),
                content: contents.value(row).to_string(),
                embedding: values.values().to_vec(),
                metadata: parse_metadata(metadata.value(row)),
                created_at: DateTime::parse_from_rfc3339(created_ats.value(row))
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Convert a vector search batch; cosine distance becomes `1 - distance`.
#[inline]
pub fn batch_to_ranked(batch: &RecordBatch) -> Result<Vec<RankedChunk>> {
    let filenames = column::<StringArray>(batch, "filename")?;
    let contents = column::<StringArray>(batch, "content")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    let distances = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|row| {
            let similarity = distances
                .filter(|d| !d.is_null(row))
                .map(|d| 1.0 - d.value(row))
                .filter(|s| s.is_finite())
                .unwrap_or(0.0);

            RankedChunk {
                content: contents.value(row).to_string(),
                filename: filenames.value(row).to_string(),
                metadata: parse_metadata(metadata.value(row)),
                similarity,
            }
        })
        .collect())
}

/// SQL string literal for a LanceDB filter.
#[inline]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
