use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::apis::CandidateRecord;

/// Similarity gaps at or below this are treated as ties.
const SIMILARITY_EPSILON: f32 = 1e-9;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub record: CandidateRecord,
    /// Cosine similarity against the query vector, in [-1, 1].
    pub similarity: f32,
    /// 1-based position within this candidate's source ranking.
    pub rank: u32,
}

/// Cosine similarity of two vectors. Mismatched lengths or a zero-norm
/// operand score 0.0, so every candidate gets a finite score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
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
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Score one source's candidates against the query vector and return them
/// ordered, truncated to `limit`, with 1-based ranks assigned.
pub fn rank_candidates(
    query_vector: &[f32],
    candidates: Vec<(CandidateRecord, Arc<Vec<f32>>)>,
    limit: usize,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<(CandidateRecord, f32)> = candidates
        .into_iter()
        .map(|(record, vector)| {
            let similarity = cosine_similarity(query_vector, &vector);
            (record, similarity)
        })
        .collect();

    scored.sort_by(|a, b| compare_scored(a.1, &a.0, b.1, &b.0));
    scored.truncate(limit);

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (record, similarity))| ScoredCandidate {
            record,
            similarity,
            rank: i as u32 + 1,
        })
        .collect()
}

/// Total deterministic order over scored records: similarity descending;
/// within epsilon, more recent year first with absent years after all
/// present years, then title ascending.
pub(crate) fn compare_scored(
    sim_a: f32,
    rec_a: &CandidateRecord,
    sim_b: f32,
    rec_b: &CandidateRecord,
) -> Ordering {
    if (sim_a - sim_b).abs() > SIMILARITY_EPSILON {
        return sim_b.partial_cmp(&sim_a).unwrap_or(Ordering::Equal);
    }
    match (rec_a.year, rec_b.year) {
        (Some(ya), Some(yb)) if ya != yb => yb.cmp(&ya),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => rec_a.title.cmp(&rec_b.title),
    }
}
