//! Descriptor matching with Lowe's ratio test.

use serde::{Deserialize, Serialize};

use super::Descriptors;

/// Lowe's ratio threshold (best / second best).
pub const NN_RATIO: f32 = 0.75;

/// Configuration shared by every ratio-tested match in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub ratio_threshold: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: NN_RATIO,
        }
    }
}

/// A candidate pairing of a query descriptor with a train descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    /// L2 distance.
    pub distance: f32,
}

/// Nearest-neighbor search between two descriptor sets.
pub trait DescriptorMatcher {
    /// For every query row, up to `k` train rows sorted by ascending distance.
    fn knn_match(&self, query: &Descriptors, train: &Descriptors, k: usize) -> Vec<Vec<DescriptorMatch>>;
}

/// Exhaustive L2 search.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceMatcher;

/// Squared L2 distance between two descriptors.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl DescriptorMatcher for BruteForceMatcher {
    fn knn_match(&self, query: &Descriptors, train: &Descriptors, k: usize) -> Vec<Vec<DescriptorMatch>> {
        if k == 0 || query.dim() != train.dim() {
            return vec![Vec::new(); query.len()];
        }

        query
            .rows()
            .enumerate()
            .map(|(qi, q)| {
                // Keep the k best in a small sorted buffer.
                let mut best: Vec<(f32, usize)> = Vec::with_capacity(k + 1);
                for (ti, t) in train.rows().enumerate() {
                    let d = l2_squared(q, t);
                    if best.len() < k || d < best[best.len() - 1].0 {
                        let pos = best.partition_point(|&(bd, _)| bd <= d);
                        best.insert(pos, (d, ti));
                        best.truncate(k);
                    }
                }
                best.into_iter()
                    .map(|(d, ti)| DescriptorMatch {
                        query_idx: qi,
                        train_idx: ti,
                        distance: d.sqrt(),
                    })
                    .collect()
            })
            .collect()
    }
}

/// 2-NN matching filtered by the ratio test.
///
/// A query is kept when `best < ratio * second_best`. Queries with fewer
/// than two candidates cannot be tested and are dropped. Output is ordered
/// by query index.
pub fn match_with_ratio_test(
    matcher: &dyn DescriptorMatcher,
    query: &Descriptors,
    train: &Descriptors,
    ratio: f32,
) -> Vec<DescriptorMatch> {
    matcher
        .knn_match(query, train, 2)
        .into_iter()
        .filter_map(|candidates| match candidates.as_slice() {
            [best, second, ..] if best.distance < ratio * second.distance => Some(*best),
            _ => None,
        })
        .collect()
}
