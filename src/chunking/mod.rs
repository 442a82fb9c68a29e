// Chunking module
// Upstream chunk records: the text splitter and chunk-file loading


use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Separators tried in order, coarsest first. The empty separator splits
/// into single characters and always applies.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// An immutable span of extracted document text plus its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    /// 0-based position within the document
    pub chunk_id: u32,
    pub total_chunks: u32,
    /// Anything else the extractor recorded (page diagnostics and the like)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chunk {
    #[inline]
    pub fn new(content: impl Into<String>, filename: &str, chunk_id: u32, total_chunks: u32) -> Self {
        Self {
            content: content.into(),
            metadata: ChunkMetadata {
                filename: filename.to_string(),
                chunk_id,
                total_chunks,
                extra: Map::new(),
            },
        }
    }

    /// Metadata as the JSON object persisted next to the chunk
    #[inline]
    pub fn metadata_value(&self) -> Value {
        serde_json::to_value(&self.metadata).unwrap_or(Value::Null)
    }
}

/// Configuration for text splitting, sizes in characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Recursive character splitter.
///
/// Text is cut on the coarsest separator that occurs in it; pieces still
/// larger than `chunk_size` are cut again with the next separator. Adjacent
/// pieces are then merged back up to `chunk_size`, carrying up to
/// `chunk_overlap` characters from the end of one chunk into the next.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: ChunkingConfig,
}

impl TextSplitter {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    #[inline]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Split `text` and wrap the pieces as chunks of `filename`.
    #[inline]
    pub fn create_chunks(&self, text: &str, filename: &str) -> Vec<Chunk> {
        let pieces = self.split_text(text);
        let total_chunks = u32::try_from(pieces.len()).unwrap_or(u32::MAX);

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(0u32..)
            .map(|(content, chunk_id)| Chunk::new(content, filename, chunk_id, total_chunks))
            .collect();

        debug!(
            "Split '{}' into {} chunks (chunk_size {}, overlap {})",
            filename,
            chunks.len(),
            self.config.chunk_size,
            self.config.chunk_overlap
        );

        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, remaining) = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .map_or(("", &[][..]), |index| {
                (separators[index], &separators[index + 1..])
            });

        let splits: Vec<&str> = if separator.is_empty() {
            text.split_inclusive(|_: char| true).collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<&str> = Vec::new();

        for split in splits {
            if char_len(split) < self.config.chunk_size {
                good_splits.push(split);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits, separator));
                good_splits.clear();
            }

            if remaining.is_empty() {
                final_chunks.push(split.to_string());
            } else {
                final_chunks.extend(self.split_recursive(split, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits, separator));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &split in splits {
            let len = char_len(split);
            let joiner = if current.is_empty() { 0 } else { separator_len };

            if total + len + joiner > chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current, separator);

                // Drop from the front until what remains fits as overlap.
                while total > overlap
                    || (total > 0
                        && total + len + if current.is_empty() { 0 } else { separator_len }
                            > chunk_size)
                {
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(front) + if current.is_empty() { 0 } else { separator_len };
                }
            }

            let joiner = if current.is_empty() { 0 } else { separator_len };
            current.push_back(split);
            total += len + joiner;
        }

        push_joined(&mut docs, &current, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, parts: &VecDeque<&str>, separator: &str) {
    let joined = parts.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Concatenate per-page text with `--- Page N ---` markers, 1-based.
#[inline]
pub fn pages_to_text<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .zip(1usize..)
        .fold(String::new(), |mut text, (page, number)| {
            text.push_str("\n--- Page ");
            text.push_str(&number.to_string());
            text.push_str(" ---\n");
            text.push_str(page.as_ref());
            text
        })
}

/// Contents of a JSON ingestion file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JsonSource {
    /// Chunk records produced by an upstream extractor
    Chunks(Vec<Chunk>),
    /// Extracted text, one string per page
    Pages(Vec<String>),
}

/// Read a JSON file holding either chunk records or per-page text.
#[inline]
pub fn load_json_source<P: AsRef<Path>>(path: P) -> Result<JsonSource> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunk file: {}", path.display()))?;

    let source: JsonSource = serde_json::from_str(&content).with_context(|| {
        format!(
            "Failed to parse {}: expected chunk records or page strings",
            path.display()
        )
    })?;

    match source {
        JsonSource::Chunks(ref chunks) => {
            debug!("Loaded {} chunks from {}", chunks.len(), path.display());
        }
        JsonSource::Pages(ref pages) => {
            debug!("Loaded {} pages from {}", pages.len(), path.display());
        }
    }
    Ok(source)
}
