//! Coarse relative-rotation estimate between the matched images.
//!
//! For every pair of correspondences the segment joining the two points
//! has an orientation in each image; the per-pair orientation difference
//! votes into a circular histogram. A dominant histogram peak gives the
//! rotation of the match image relative to the reference. The estimate is
//! diagnostic only and never feeds back into the fitted transform.

use crate::matching::Correspondence;

const NUM_BINS: usize = 180;

/// Binomial smoothing kernel, normalized to 1.
const KERNEL: [f64; 5] = [
    1.0 / 16.0,
    4.0 / 16.0,
    6.0 / 16.0,
    4.0 / 16.0,
    1.0 / 16.0,
];

/// Peak acceptance: the runner-up bin must hold at most this fraction of
/// the peak vote.
const PEAK_DOMINANCE: f64 = 0.9;

/// Estimate the relative rotation in degrees, if a single rotation
/// dominates. Returns `None` for ambiguous or tiny inputs.
pub fn estimate_relative_rotation(pairs: &[Correspondence]) -> Option<f64> {
    if pairs.len() < 3 {
        return None;
    }

    let mut hist = [0.0f64; NUM_BINS];
    let tau = std::f64::consts::TAU;
    for i in 0..pairs.len() {
        for j in (i + 1)..pairs.len() {
            let ref_angle = segment_angle(pairs[i].reference, pairs[j].reference);
            let match_angle = segment_angle(pairs[i].matched, pairs[j].matched);
            let (ref_angle, match_angle) = match (ref_angle, match_angle) {
                (Some(r), Some(m)) => (r, m),
                _ => continue,
            };
            let diff = (match_angle - ref_angle).rem_euclid(tau);
            let bin = ((diff / tau) * NUM_BINS as f64) as usize % NUM_BINS;
            hist[bin] += 1.0;
        }
    }

    let smoothed = smooth_circular(&hist);
    let peak = find_dominant_peak(&smoothed)?;
    Some(peak as f64 * (360.0 / NUM_BINS as f64))
}

fn segment_angle(a: [f64; 2], b: [f64; 2]) -> Option<f64> {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(dy.atan2(dx))
}

/// Convolve the histogram with the binomial kernel, wrapping at the ends.
fn smooth_circular(hist: &[f64; NUM_BINS]) -> [f64; NUM_BINS] {
    let mut out = [0.0f64; NUM_BINS];
    for (i, slot) in out.iter_mut().enumerate() {
        for (k, &w) in KERNEL.iter().enumerate() {
            let src = (i + NUM_BINS + k - KERNEL.len() / 2) % NUM_BINS;
            *slot += w * hist[src];
        }
    }
    out
}

/// Index of the histogram maximum, if it clearly beats the runner-up.
fn find_dominant_peak(hist: &[f64; NUM_BINS]) -> Option<usize> {
    let mut best = 0usize;
    for i in 1..NUM_BINS {
        if hist[i] > hist[best] {
            best = i;
        }
    }
    if hist[best] <= 0.0 {
        return None;
    }

    // Runner-up outside the peak's smoothing footprint.
    let mut second = 0.0f64;
    for (i, &v) in hist.iter().enumerate() {
        let dist = circular_distance(i, best);
        if dist > KERNEL.len() / 2 && v > second {
            second = v;
        }
    }
    if second <= PEAK_DOMINANCE * hist[best] {
        Some(best)
    } else {
        None
    }
}

fn circular_distance(a: usize, b: usize) -> usize {
    let d = a.abs_diff(b);
    d.min(NUM_BINS - d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rotated_pairs(degrees: f64, n: usize) -> Vec<Correspondence> {
        let theta = degrees.to_radians();
        let (sin, cos) = theta.sin_cos();
        (0..n)
            .map(|i| {
                let x = (i % 7) as f64 * 13.0 + (i / 7) as f64 * 3.0;
                let y = (i / 7) as f64 * 17.0 + (i % 7) as f64 * 5.0;
                Correspondence {
                    reference: [x, y],
                    matched: [cos * x - sin * y, sin * x + cos * y],
                }
            })
            .collect()
    }

    #[test]
    fn recovers_a_pure_rotation() {
        let rot = estimate_relative_rotation(&rotated_pairs(30.0, 25)).unwrap();
        assert_relative_eq!(rot, 30.0, epsilon = 2.0);
    }

    #[test]
    fn identity_alignment_reads_as_zero() {
        let rot = estimate_relative_rotation(&rotated_pairs(0.0, 25)).unwrap();
        assert_relative_eq!(rot, 0.0, epsilon = 2.0);
    }

    #[test]
    fn ambiguous_votes_give_no_estimate() {
        // Half the pairs agree on 0 degrees, half on 90: two equal peaks,
        // so neither dominates. Cross-pair votes scatter across bins.
        let mut pairs = rotated_pairs(0.0, 10);
        pairs.extend(rotated_pairs(90.0, 10));
        assert_eq!(estimate_relative_rotation(&pairs), None);
    }

    #[test]
    fn tiny_inputs_give_no_estimate() {
        assert_eq!(estimate_relative_rotation(&rotated_pairs(10.0, 2)), None);
    }
}
