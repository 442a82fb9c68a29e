// Similarity ranking
// Cosine scoring and top-k selection for backends without a native operator


use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::database::RankedChunk;

/// How a store orders rows for a query, chosen when the store initializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingStrategy {
    /// The backend's own distance operator orders and truncates
    Native,
    /// Every row is fetched and scored here
    InProcess,
}

impl fmt::Display for RankingStrategy {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RankingStrategy::Native => write!(f, "native"),
            RankingStrategy::InProcess => write!(f, "in-process"),
        }
    }
}

/// A stored row as seen by the in-process ranker.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub content: String,
    pub filename: String,
    pub metadata: Value,
    pub embedding: Vec<f32>,
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector has zero magnitude or the lengths differ,
/// so the result is never NaN. Accumulates in f64.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot = x.mul_add(y, dot);
        norm_a = x.mul_add(x, norm_a);
        norm_b = y.mul_add(y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_finite() {
        // Rounding can push identical directions a hair past 1.
        similarity.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Score every candidate against `query`, sort by descending similarity and
/// keep the first `k`.
///
/// The sort is stable, so equal scores keep their input order.
#[inline]
pub fn rank_top_k(query: &[f32], candidates: Vec<Candidate>, k: usize) -> Vec<RankedChunk> {
    let total = candidates.len();

    let mut ranked: Vec<RankedChunk> = candidates
        .into_iter()
        .map(|candidate| RankedChunk {
            similarity: cosine_similarity(query, &candidate.embedding),
            content: candidate.content,
            filename: candidate.filename,
            metadata: candidate.metadata,
        })
        .collect();

    ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    ranked.truncate(k);

    debug!("Ranked {} candidates in process, kept {}", total, ranked.len());
    ranked
}
