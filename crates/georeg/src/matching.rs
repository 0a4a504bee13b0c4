//! Descriptor matching and match filtering.
//!
//! Matching is brute-force two-nearest-neighbor search from the reference
//! ("query") descriptors into the match-image ("train") descriptors. The
//! raw candidates then pass through a fixed filter chain: ratio test,
//! index validation, duplicate suppression, and a distance ceiling.

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::feature::{Descriptors, FeatureSet};

/// A query descriptor with its two nearest train descriptors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoNn {
    pub query: usize,
    pub train: usize,
    pub distance: f32,
    pub second_distance: f32,
}

/// A surviving one-to-one match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    pub distance: f32,
}

/// A matched point pair in pixel coordinates, reference side first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub reference: [f64; 2],
    pub matched: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// One image produced binary descriptors and the other float ones.
    DescriptorMismatch,
    /// A filter stage left fewer matches than the pipeline can use.
    InsufficientMatches {
        stage: &'static str,
        got: usize,
        needed: usize,
    },
}

impl std::fmt::Display for MatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DescriptorMismatch => {
                write!(f, "cannot match binary descriptors against float descriptors")
            }
            Self::InsufficientMatches { stage, got, needed } => write!(
                f,
                "only {} matches after {} filtering (need at least {})",
                got, stage, needed
            ),
        }
    }
}

impl std::error::Error for MatchError {}

fn hamming32(a: &[u8; 32], b: &[u8; 32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum::<u32>() as f32
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Brute-force two-nearest-neighbor search from `query` into `train`.
///
/// Queries are skipped entirely when the train set has fewer than two
/// descriptors, since the ratio test needs a second neighbor.
pub fn match_two_nn(query: &Descriptors, train: &Descriptors) -> Result<Vec<TwoNn>, MatchError> {
    match (query, train) {
        (Descriptors::Binary(q), Descriptors::Binary(t)) => Ok(two_nn(q, t, |a, b| hamming32(a, b))),
        (Descriptors::Float(q), Descriptors::Float(t)) => Ok(two_nn(q, t, |a, b| euclidean(a, b))),
        _ => Err(MatchError::DescriptorMismatch),
    }
}

fn two_nn<D, F: Fn(&D, &D) -> f32>(query: &[D], train: &[D], dist: F) -> Vec<TwoNn> {
    if train.len() < 2 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(query.len());
    for (qi, q) in query.iter().enumerate() {
        let mut best = f32::INFINITY;
        let mut second = f32::INFINITY;
        let mut best_ti = 0usize;
        for (ti, t) in train.iter().enumerate() {
            let d = dist(q, t);
            if d < best {
                second = best;
                best = d;
                best_ti = ti;
            } else if d < second {
                second = d;
            }
        }
        out.push(TwoNn {
            query: qi,
            train: best_ti,
            distance: best,
            second_distance: second,
        });
    }
    out
}

/// Run the filter chain over raw two-NN candidates.
///
/// Stages, in order:
/// 1. ratio test: keep only matches with `distance < ratio * second_distance`;
/// 2. index validation against the descriptor counts;
/// 3. duplicate suppression: drop a match once `duplicate_cutoff` other
///    matches share its query or train index;
/// 4. distance ceiling.
///
/// The minimum-count check runs after the ratio test and again at the end.
pub fn filter_matches(
    candidates: &[TwoNn],
    n_query: usize,
    n_train: usize,
    config: &FilterConfig,
) -> Result<Vec<FeatureMatch>, MatchError> {
    let ratio_passed: Vec<FeatureMatch> = candidates
        .iter()
        .filter(|m| m.distance < config.ratio * m.second_distance)
        .map(|m| FeatureMatch {
            query: m.query,
            train: m.train,
            distance: m.distance,
        })
        .collect();
    tracing::info!(
        "ratio test kept {} of {} candidate matches",
        ratio_passed.len(),
        candidates.len()
    );
    if ratio_passed.len() < config.min_matches {
        return Err(MatchError::InsufficientMatches {
            stage: "ratio",
            got: ratio_passed.len(),
            needed: config.min_matches,
        });
    }

    let valid: Vec<FeatureMatch> = ratio_passed
        .into_iter()
        .filter(|m| m.query < n_query && m.train < n_train)
        .collect();

    // Duplicate suppression. A query or train index claimed by several
    // strong matches is ambiguous; every match involved is dropped.
    let deduped: Vec<FeatureMatch> = valid
        .iter()
        .filter(|m| {
            let shared = valid
                .iter()
                .filter(|o| *o != *m && (o.query == m.query || o.train == m.train))
                .count();
            shared < config.duplicate_cutoff
        })
        .copied()
        .collect();
    tracing::info!("duplicate suppression kept {} of {} matches", deduped.len(), valid.len());

    // Distance ceiling. The cutoff is the observed maximum, which keeps
    // every match; a stricter midpoint cutoff discarded usable matches on
    // cross-season imagery.
    // let ceiling = (min_dist + max_dist) / 2.0;
    let ceiling = deduped
        .iter()
        .map(|m| m.distance)
        .fold(f32::NEG_INFINITY, f32::max);
    let kept: Vec<FeatureMatch> = deduped
        .into_iter()
        .filter(|m| m.distance <= ceiling)
        .collect();

    if kept.len() < config.min_matches {
        return Err(MatchError::InsufficientMatches {
            stage: "duplicate",
            got: kept.len(),
            needed: config.min_matches,
        });
    }
    Ok(kept)
}

/// Look up the pixel coordinates behind each surviving match.
pub fn resolve_correspondences(
    matches: &[FeatureMatch],
    reference: &FeatureSet,
    matched: &FeatureSet,
) -> Vec<Correspondence> {
    matches
        .iter()
        .map(|m| Correspondence {
            reference: reference.keypoints[m.query].point(),
            matched: matched.keypoints[m.train].point(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nn(query: usize, train: usize, distance: f32, second: f32) -> TwoNn {
        TwoNn {
            query,
            train,
            distance,
            second_distance: second,
        }
    }

    #[test]
    fn two_nn_finds_nearest_pair() {
        let query = Descriptors::Float(vec![vec![0.0, 0.0], vec![10.0, 0.0]]);
        let train = Descriptors::Float(vec![vec![9.5, 0.0], vec![0.5, 0.0], vec![30.0, 0.0]]);
        let nns = match_two_nn(&query, &train).unwrap();
        assert_eq!(nns[0].train, 1);
        assert_eq!(nns[1].train, 0);
        assert!(nns[0].distance < nns[0].second_distance);
    }

    #[test]
    fn two_nn_skips_tiny_train_set() {
        let query = Descriptors::Float(vec![vec![0.0]]);
        let train = Descriptors::Float(vec![vec![1.0]]);
        assert!(match_two_nn(&query, &train).unwrap().is_empty());
    }

    #[test]
    fn mixed_descriptor_kinds_are_rejected() {
        let query = Descriptors::Binary(vec![[0u8; 32]]);
        let train = Descriptors::Float(vec![vec![0.0; 128]]);
        assert_eq!(match_two_nn(&query, &train), Err(MatchError::DescriptorMismatch));
    }

    #[test]
    fn hamming_distance_counts_differing_bits() {
        let mut a = [0u8; 32];
        let b = [0u8; 32];
        a[0] = 0b1010_1010;
        a[31] = 0b0000_0001;
        assert_eq!(hamming32(&a, &b), 5.0);
    }

    #[test]
    fn ratio_test_is_strict() {
        // Equal best and second distances never pass, whatever the ratio.
        let candidates = vec![nn(0, 0, 4.0, 4.0), nn(1, 1, 4.0, 4.0), nn(2, 2, 4.0, 4.0)];
        let err = filter_matches(&candidates, 3, 3, &FilterConfig::default());
        assert_eq!(
            err,
            Err(MatchError::InsufficientMatches {
                stage: "ratio",
                got: 0,
                needed: 3
            })
        );
    }

    #[test]
    fn clear_matches_survive_filtering() {
        let candidates = vec![
            nn(0, 5, 1.0, 10.0),
            nn(1, 6, 2.0, 10.0),
            nn(2, 7, 3.0, 10.0),
            nn(3, 8, 1.5, 10.0),
        ];
        let kept = filter_matches(&candidates, 4, 9, &FilterConfig::default()).unwrap();
        assert_eq!(kept.len(), 4);
        // Input order is preserved.
        assert_eq!(kept[0].query, 0);
        assert_eq!(kept[3].query, 3);
    }

    #[test]
    fn out_of_range_indices_are_dropped() {
        let candidates = vec![
            nn(0, 5, 1.0, 10.0),
            nn(1, 6, 2.0, 10.0),
            nn(2, 7, 3.0, 10.0),
            nn(3, 99, 1.5, 10.0),
        ];
        let kept = filter_matches(&candidates, 4, 9, &FilterConfig::default()).unwrap();
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|m| m.train < 9));
    }

    #[test]
    fn duplicate_train_index_is_suppressed_at_cutoff() {
        // Three matches share train index 5, reaching the cutoff of 2
        // shared partners each; all three are dropped.
        let candidates = vec![
            nn(0, 5, 1.0, 10.0),
            nn(1, 5, 2.0, 10.0),
            nn(2, 5, 3.0, 10.0),
            nn(3, 8, 1.5, 10.0),
            nn(4, 9, 1.5, 10.0),
            nn(5, 10, 1.5, 10.0),
        ];
        let kept = filter_matches(&candidates, 6, 11, &FilterConfig::default()).unwrap();
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|m| m.train != 5));
    }

    #[test]
    fn one_shared_partner_is_below_cutoff() {
        // Two matches share train index 5: one shared partner each, which
        // is below the cutoff of 2, so both stay.
        let candidates = vec![
            nn(0, 5, 1.0, 10.0),
            nn(1, 5, 2.0, 10.0),
            nn(2, 7, 3.0, 10.0),
        ];
        let kept = filter_matches(&candidates, 3, 8, &FilterConfig::default()).unwrap();
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn resolve_maps_indices_to_pixel_coordinates() {
        use crate::feature::{FeatureSet, Keypoint};
        let kp = |x: f32, y: f32| Keypoint {
            x,
            y,
            response: 1.0,
            angle: 0.0,
        };
        let reference = FeatureSet::new(
            vec![kp(10.0, 20.0), kp(30.0, 40.0)],
            Descriptors::Binary(vec![[0u8; 32]; 2]),
        );
        let matched = FeatureSet::new(
            vec![kp(1.0, 2.0), kp(3.0, 4.0)],
            Descriptors::Binary(vec![[0u8; 32]; 2]),
        );
        let matches = vec![FeatureMatch {
            query: 1,
            train: 0,
            distance: 0.0,
        }];
        let pairs = resolve_correspondences(&matches, &reference, &matched);
        assert_eq!(pairs[0].reference, [30.0, 40.0]);
        assert_eq!(pairs[0].matched, [1.0, 2.0]);
    }
}
