//! Embedding-based candidate ranking.
//!
//! Takes the screener's shortlist (or the whole window when every past item
//! carries an embedding) and orders it by cosine similarity to the current
//! item, keeping the top-K for the arbiter.

use crate::config::ScreeningConfig;
use crate::screen::{LexicalScore, ScreenedCandidate};

/// A shortlist entry with its embedding similarity attached.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: ScreenedCandidate,
    pub similarity: f32,
}

/// Cosine similarity between two vectors, clamped to 0.0-1.0. Mismatched or
/// empty inputs score zero rather than erroring; a candidate without a usable
/// embedding simply ranks last.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() || denom < f64::EPSILON {
        return 0.0;
    }

    let raw = dot / denom;
    if !raw.is_finite() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0) as f32
}

/// Rank `candidates` by cosine similarity to `current_embedding`, descending,
/// keeping at most `rank_top_k`. Candidates without an embedding score 0.0.
pub fn rank(
    current_embedding: &[f32],
    candidates: Vec<ScreenedCandidate>,
    config: &ScreeningConfig,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let similarity = candidate
                .item
                .embedding
                .as_deref()
                .map(|e| cosine_similarity(current_embedding, e))
                .unwrap_or(0.0);
            RankedCandidate {
                candidate,
                similarity,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(config.rank_top_k);
    ranked
}

/// Fast-path duplicate check: the best similarity clears the strict
/// embedding threshold. Callers still require lexical agreement before
/// short-circuiting to SKIP.
pub fn is_likely_duplicate(max_similarity: f32, high_threshold: f32) -> bool {
    max_similarity >= high_threshold
}

impl RankedCandidate {
    pub fn lexical(&self) -> LexicalScore {
        self.candidate.lexical
    }
}
