use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::apis::{CandidateRecord, Source};
use crate::rank::{compare_scored, ScoredCandidate};

/// Token-set overlap at or above this merges two title variants, provided
/// their years do not disagree.
const TITLE_JACCARD_THRESHOLD: f64 = 0.9;

/// A cluster of candidates judged to be the same paper across sources.
#[derive(Debug, Clone, Serialize)]
pub struct MergedResult {
    /// Member whose record stands for the cluster: longest non-empty
    /// abstract, then source preference order.
    pub representative: CandidateRecord,
    /// Max similarity among members. A paper any single source found
    /// highly similar ranks high overall.
    pub score: f32,
    pub sources: BTreeSet<Source>,
    pub members: Vec<ScoredCandidate>,
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn token_jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn years_compatible(a: Option<i32>, b: Option<i32>) -> bool {
    match (a, b) {
        (Some(ya), Some(yb)) => ya == yb,
        _ => true,
    }
}

fn same_paper(
    norm_a: &str,
    tokens_a: &HashSet<&str>,
    year_a: Option<i32>,
    norm_b: &str,
    tokens_b: &HashSet<&str>,
    year_b: Option<i32>,
) -> bool {
    if norm_a.is_empty() || norm_b.is_empty() {
        return false;
    }
    if norm_a == norm_b {
        return true;
    }
    token_jaccard(tokens_a, tokens_b) >= TITLE_JACCARD_THRESHOLD && years_compatible(year_a, year_b)
}

/// Cluster the per-source rankings into one merged, ordered result list.
///
/// Clustering is transitive: when A~B and B~C, all three land in one
/// cluster even if A and C alone would not match. Pairs within one source
/// are subject to the same test, so a source that returns the same paper
/// twice collapses too.
pub fn merge(per_source: &BTreeMap<Source, Vec<ScoredCandidate>>) -> Vec<MergedResult> {
    // Flatten in source-then-rank order; everything downstream inherits
    // this deterministic traversal.
    let members: Vec<&ScoredCandidate> = per_source.values().flatten().collect();
    let n = members.len();
    if n == 0 {
        return Vec::new();
    }

    let normalized: Vec<String> = members
        .iter()
        .map(|m| normalize_title(&m.record.title))
        .collect();
    let tokens: Vec<HashSet<&str>> = normalized
        .iter()
        .map(|t| t.split_whitespace().collect())
        .collect();

    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if find(&mut parent, i) == find(&mut parent, j) {
                continue;
            }
            if same_paper(
                &normalized[i],
                &tokens[i],
                members[i].record.year,
                &normalized[j],
                &tokens[j],
                members[j].record.year,
            ) {
                union(&mut parent, i, j);
            }
        }
    }

    // Group members by cluster root, clusters ordered by first appearance.
    let mut cluster_of_root: HashMap<usize, usize> = HashMap::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        let slot = *cluster_of_root.entry(root).or_insert_with(|| {
            clusters.push(Vec::new());
            clusters.len() - 1
        });
        clusters[slot].push(i);
    }

    let mut merged: Vec<MergedResult> = clusters
        .into_iter()
        .map(|indices| {
            let mut representative = members[indices[0]];
            let mut score = members[indices[0]].similarity;
            for &i in &indices[1..] {
                let candidate = members[i];
                if score < candidate.similarity {
                    score = candidate.similarity;
                }
                if prefer(candidate, representative) {
                    representative = candidate;
                }
            }
            MergedResult {
                representative: representative.record.clone(),
                score,
                sources: indices.iter().map(|&i| members[i].record.source).collect(),
                members: indices.iter().map(|&i| members[i].clone()).collect(),
            }
        })
        .collect();

    merged.sort_by(|a, b| {
        compare_scored(a.score, &a.representative, b.score, &b.representative)
    });

    tracing::debug!(candidates = n, clusters = merged.len(), "merged across sources");
    merged
}

/// Whether `candidate` makes a better cluster representative than `current`.
fn prefer(candidate: &ScoredCandidate, current: &ScoredCandidate) -> bool {
    let len_candidate = abstract_len(&candidate.record);
    let len_current = abstract_len(&current.record);
    if len_candidate != len_current {
        return len_candidate > len_current;
    }
    candidate.record.source.preference() < current.record.source.preference()
}

fn abstract_len(record: &CandidateRecord) -> usize {
    record
        .abstract_text
        .as_deref()
        .map(|a| a.trim().len())
        .unwrap_or(0)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[rb.max(ra)] = rb.min(ra);
    }
}
