//! Cosine similarity and best-match search over stored embeddings.

use crate::types::{BestMatch, FaceEmbedding};
use thiserror::Error;

/// Recommended threshold for live recognition of tracked faces.
pub const DEFAULT_TRACKING_THRESHOLD: f32 = 0.75;
/// Recommended threshold for a generic best-match search.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`.
///
/// Nominally in [-1, 1]; rounding may push it slightly outside and the
/// value is returned as computed. Returns NaN when either vector has zero
/// norm, so a degenerate candidate never passes a threshold comparison.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        Ok(dot / denom)
    } else {
        Ok(f32::NAN)
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match<'a>(
        &self,
        probe: &[f32],
        gallery: &'a [FaceEmbedding],
        threshold: f32,
    ) -> Result<Option<BestMatch<'a>>, MatchError>;
}

/// Linear-scan cosine matcher.
///
/// A candidate replaces the current best only when its similarity is
/// strictly greater than both the current best and `threshold`, so among
/// equal scores the earliest candidate wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match<'a>(
        &self,
        probe: &[f32],
        gallery: &'a [FaceEmbedding],
        threshold: f32,
    ) -> Result<Option<BestMatch<'a>>, MatchError> {
        let mut best: Option<BestMatch<'a>> = None;

        for (index, record) in gallery.iter().enumerate() {
            let similarity = cosine_similarity(probe, &record.embedding)?;
            let beats_best = best.map_or(true, |b| similarity > b.similarity);
            if beats_best && similarity > threshold {
                best = Some(BestMatch {
                    record,
                    index,
                    similarity,
                });
            }
        }

        Ok(best)
    }
}

/// Convenience wrapper around [`CosineMatcher`].
pub fn find_best_match<'a>(
    query: &[f32],
    candidates: &'a [FaceEmbedding],
    threshold: f32,
) -> Result<Option<BestMatch<'a>>, MatchError> {
    CosineMatcher.best_match(query, candidates, threshold)
}
