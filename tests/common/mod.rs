//! Helpers shared by the integration suites

use docuchat::chunking::Chunk;
use docuchat::embeddings::{EmbeddingProvider, ProviderError};

/// Deterministic vectors: "cats" and "dogs" are orthogonal, text naming both
/// sits between them, anything else points along the third axis.
pub struct KeywordProvider;

impl KeywordProvider {
    pub fn vector_for(text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        match (text.contains("cat"), text.contains("dog")) {
            (true, true) => vec![0.7, 0.7, 0.0],
            (true, false) => vec![1.0, 0.0, 0.0],
            (false, true) => vec![0.0, 1.0, 0.0],
            (false, false) => vec![0.0, 0.0, 1.0],
        }
    }
}

impl EmbeddingProvider for KeywordProvider {
    fn model(&self) -> &str {
        "keyword"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

pub fn chunks(filename: &str, contents: &[&str]) -> Vec<Chunk> {
    let total = u32::try_from(contents.len()).expect("chunk count should fit u32");
    contents
        .iter()
        .zip(0u32..)
        .map(|(content, id)| Chunk::new(*content, filename, id, total))
        .collect()
}
