//! Rank fusion of a vector-ranked list and a keyword-ranked list.
//!
//! Both inputs are `(id, score)` pairs already sorted best-first by the search
//! that produced them. Fusion is stateless; the caller attaches document
//! content and metadata afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default RRF constant. Higher values smooth out rank differences.
pub const DEFAULT_RRF_CONSTANT: f32 = 60.0;

/// Default vector weight for [`FusionStrategy::Weighted`].
pub const DEFAULT_ALPHA: f32 = 0.5;

/// Minimum number of candidates a hybrid search pulls from each sub-index.
const MIN_OVERFETCH: usize = 50;

fn default_rrf_constant() -> f32 {
    DEFAULT_RRF_CONSTANT
}

fn default_alpha() -> f32 {
    DEFAULT_ALPHA
}

/// How two ranked lists are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FusionStrategy {
    /// `score = Σ 1 / (rank + constant)` with 1-based ranks.
    ReciprocalRank {
        #[serde(default = "default_rrf_constant")]
        constant: f32,
    },
    /// `score = alpha * vec_norm + (1 - alpha) * kw_norm` over min-max
    /// normalized scores.
    ///
    /// - `alpha = 1.0` — pure vector ranking
    /// - `alpha = 0.0` — pure keyword ranking
    Weighted {
        #[serde(default = "default_alpha")]
        alpha: f32,
    },
}

impl Default for FusionStrategy {
    fn default() -> Self {
        Self::ReciprocalRank {
            constant: DEFAULT_RRF_CONSTANT,
        }
    }
}

/// One entry of a fused ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedResult {
    pub id: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Number of candidates to request from each sub-search when fusing `top_k`.
///
/// Pulling only `top_k` from each side loses recall whenever the two top sets
/// barely overlap.
pub fn overfetch(top_k: usize) -> usize {
    top_k.saturating_mul(3).max(MIN_OVERFETCH)
}

/// Merge a vector ranking and a keyword ranking into one list of at most
/// `top_k` results, best first.
pub fn merge(
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    top_k: usize,
    strategy: FusionStrategy,
) -> Vec<FusedResult> {
    let mut fused = match strategy {
        FusionStrategy::ReciprocalRank { constant } => {
            reciprocal_rank(vector_results, keyword_results, constant)
        }
        FusionStrategy::Weighted { alpha } => {
            weighted(vector_results, keyword_results, alpha.clamp(0.0, 1.0))
        }
    };

    // Stable sort: ties keep first-seen order (vector list, then keyword list).
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(top_k);
    fused
}

/// Accumulates fused scores in first-seen order.
#[derive(Default)]
struct Accumulator {
    results: Vec<FusedResult>,
    positions: HashMap<String, usize>,
}

impl Accumulator {
    fn entry(&mut self, id: &str) -> &mut FusedResult {
        let pos = match self.positions.get(id).copied() {
            Some(pos) => pos,
            None => {
                let pos = self.results.len();
                self.positions.insert(id.to_string(), pos);
                self.results.push(FusedResult {
                    id: id.to_string(),
                    score: 0.0,
                    vector_similarity: None,
                    keyword_score: None,
                    metadata: HashMap::new(),
                });
                pos
            }
        };
        &mut self.results[pos]
    }

    fn into_results(self) -> Vec<FusedResult> {
        self.results
    }
}

fn reciprocal_rank(
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    constant: f32,
) -> Vec<FusedResult> {
    let mut acc = Accumulator::default();

    for (rank, (id, similarity)) in vector_results.iter().enumerate() {
        let entry = acc.entry(id);
        entry.score += 1.0 / ((rank + 1) as f32 + constant);
        entry.vector_similarity = Some(*similarity);
    }
    for (rank, (id, score)) in keyword_results.iter().enumerate() {
        let entry = acc.entry(id);
        entry.score += 1.0 / ((rank + 1) as f32 + constant);
        entry.keyword_score = Some(*score);
    }

    acc.into_results()
}

fn weighted(
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    alpha: f32,
) -> Vec<FusedResult> {
    let vector_norm = min_max_normalize(vector_results);
    let keyword_norm = min_max_normalize(keyword_results);
    let keyword_weight = 1.0 - alpha;

    let mut acc = Accumulator::default();

    // A list with zero weight adds no candidates, only component scores.
    if alpha > 0.0 {
        for ((id, similarity), norm) in vector_results.iter().zip(&vector_norm) {
            let entry = acc.entry(id);
            entry.score += alpha * norm;
            entry.vector_similarity = Some(*similarity);
        }
    }
    if keyword_weight > 0.0 {
        for ((id, score), norm) in keyword_results.iter().zip(&keyword_norm) {
            let entry = acc.entry(id);
            entry.score += keyword_weight * norm;
            entry.keyword_score = Some(*score);
        }
    }

    let mut results = acc.into_results();
    for result in &mut results {
        if result.vector_similarity.is_none() {
            result.vector_similarity = lookup(vector_results, &result.id);
        }
        if result.keyword_score.is_none() {
            result.keyword_score = lookup(keyword_results, &result.id);
        }
    }
    results
}

fn lookup(list: &[(String, f32)], id: &str) -> Option<f32> {
    list.iter().find(|(other, _)| other == id).map(|(_, s)| *s)
}

/// Scale scores into `[0, 1]`. A list whose scores are all equal maps to 1.0.
fn min_max_normalize(list: &[(String, f32)]) -> Vec<f32> {
    let (min, max) = list.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, s)| {
        (lo.min(*s), hi.max(*s))
    });
    let range = max - min;
    list.iter()
        .map(|(_, s)| if range > 0.0 { (s - min) / range } else { 1.0 })
        .collect()
}
