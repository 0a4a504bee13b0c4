//! Projective transform estimation via DLT with Hartley normalization.
//!
//! Provides:
//! - Direct Linear Transform (DLT) from ≥4 point correspondences.
//! - RANSAC wrapper for outlier-robust fitting.
//! - An adaptive inlier-threshold sweep for marginal match sets.

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::config::RansacConfig;
use crate::matching::Correspondence;

/// Inlier count the threshold sweep must strictly exceed before it stops.
const MIN_VIABLE_INLIERS: usize = 3;

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HomographyError {
    TooFewPoints { needed: usize, got: usize },
    NumericalFailure(String),
    /// No threshold in the sweep produced a model with enough inliers.
    NoInliers,
}

impl std::fmt::Display for HomographyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::NumericalFailure(msg) => write!(f, "numerical failure: {}", msg),
            Self::NoInliers => write!(f, "no transform candidate found any inliers"),
        }
    }
}

impl std::error::Error for HomographyError {}

// ── Projection ───────────────────────────────────────────────────────────

/// Project a 2D point through a 3×3 homography: H * [x, y, 1]^T → [u, v].
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> [f64; 2] {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [p[0] / p[2], p[1] / p[2]]
}

/// Reprojection error: ||project(H, src) - dst||.
pub fn reprojection_error(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2]) -> f64 {
    let p = project(h, src[0], src[1]);
    let dx = p[0] - dst[0];
    let dy = p[1] - dst[1];
    (dx * dx + dy * dy).sqrt()
}

// ── Hartley normalization ────────────────────────────────────────────────

/// Compute a normalizing transform: translate centroid to origin, scale so
/// mean distance from origin is sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);

    let normalized: Vec<[f64; 2]> = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();

    (t, normalized)
}

// ── DLT ──────────────────────────────────────────────────────────────────

/// Estimate homography from ≥4 point correspondences using DLT.
///
/// `src`: source points (match-image pixels).
/// `dst`: destination points (reference-image pixels).
///
/// Returns the 3×3 homography H such that dst ≈ project(H, src).
pub fn estimate_homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, HomographyError> {
    let n = src.len();
    if n < 4 || dst.len() < 4 {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: n.min(dst.len()),
        });
    }
    if src.len() != dst.len() {
        return Err(HomographyError::NumericalFailure(
            "src and dst must have the same length".into(),
        ));
    }

    // Hartley normalization
    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    // Build 2n × 9 matrix A
    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        // Row 2i:   [  0  0  0 | -sx -sy -1 | dy*sx  dy*sy  dy ]
        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        // Row 2i+1: [ sx  sy  1 |  0  0  0 | -dx*sx -dx*sy -dx ]
        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Solve via A^T A: the solution h is the eigenvector of the smallest
    // eigenvalue of the 9×9 matrix A^T A. This avoids thin-SVD dimension issues.
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);

    // Find eigenvector with smallest eigenvalue
    let mut min_idx = 0;
    let mut min_val = eig.eigenvalues[0].abs();
    for i in 1..9 {
        let v = eig.eigenvalues[i].abs();
        if v < min_val {
            min_val = v;
            min_idx = i;
        }
    }
    let h_vec: Vec<f64> = (0..9).map(|j| eig.eigenvectors[(j, min_idx)]).collect();
    let h_norm = Matrix3::new(
        h_vec[0], h_vec[1], h_vec[2],
        h_vec[3], h_vec[4], h_vec[5],
        h_vec[6], h_vec[7], h_vec[8],
    );

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("T_dst not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    // Normalize so h[2][2] = 1 (if possible)
    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        Ok(h)
    } else {
        Ok(h / scale)
    }
}

// ── RANSAC ───────────────────────────────────────────────────────────────

/// Result of one RANSAC fit at a fixed inlier threshold.
#[derive(Debug, Clone)]
struct RansacFit {
    h: Matrix3<f64>,
    inlier_mask: Vec<bool>,
    n_inliers: usize,
}

/// Fit a homography with RANSAC at a fixed inlier threshold.
///
/// `src`: match-image points. `dst`: reference-image points.
fn fit_homography_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    threshold: f64,
    config: &RansacConfig,
) -> Result<RansacFit, HomographyError> {
    let n = src.len();
    if n < 4 {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }

    use rand::prelude::*;
    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);

    let mut best_inliers = 0usize;
    let mut best_mask: Vec<bool> = vec![false; n];
    let mut best_h = Matrix3::identity();

    for _ in 0..config.max_iters {
        // Sample 4 distinct indices
        let mut indices = [0usize; 4];
        let mut attempts = 0;
        loop {
            for idx in &mut indices {
                *idx = rng.gen_range(0..n);
            }
            // Check distinct
            let mut ok = true;
            for i in 0..4 {
                for j in (i + 1)..4 {
                    if indices[i] == indices[j] {
                        ok = false;
                    }
                }
            }
            if ok {
                break;
            }
            attempts += 1;
            if attempts > 100 {
                break;
            }
        }

        let s4: Vec<[f64; 2]> = indices.iter().map(|&i| src[i]).collect();
        let d4: Vec<[f64; 2]> = indices.iter().map(|&i| dst[i]).collect();

        let h = match estimate_homography_dlt(&s4, &d4) {
            Ok(h) => h,
            Err(_) => continue,
        };

        // Count inliers
        let mut count = 0usize;
        let mut mask = vec![false; n];
        for i in 0..n {
            let err = reprojection_error(&h, &src[i], &dst[i]);
            if err < threshold {
                mask[i] = true;
                count += 1;
            }
        }

        if count > best_inliers {
            best_inliers = count;
            best_mask = mask;
            best_h = h;

            // Early exit if >90% inliers
            if count * 10 > n * 9 {
                break;
            }
        }
    }

    if best_inliers < 4 {
        return Err(HomographyError::NoInliers);
    }

    // Refit using all inliers
    let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
    let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();

    let h_refit = estimate_homography_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);

    // Recompute the mask with the refined H
    let mut final_mask = vec![false; n];
    let mut final_inliers = 0usize;
    for i in 0..n {
        let err = reprojection_error(&h_refit, &src[i], &dst[i]);
        if err < threshold {
            final_mask[i] = true;
            final_inliers += 1;
        }
    }

    Ok(RansacFit {
        h: h_refit,
        inlier_mask: final_mask,
        n_inliers: final_inliers,
    })
}

// ── Adaptive threshold sweep ─────────────────────────────────────────────

/// Walk `thresholds` in order, fitting at each, and return the first fit
/// whose inlier count strictly exceeds `min_inliers_exclusive` together
/// with the threshold that produced it.
///
/// If no fit clears the bar the last successful fit is returned instead;
/// downstream confidence classification handles the weak result. `None`
/// means every threshold failed outright.
fn search_adaptive_threshold<T>(
    thresholds: &[f64],
    min_inliers_exclusive: usize,
    mut fit: impl FnMut(f64) -> Option<(usize, T)>,
) -> Option<(f64, T)> {
    let mut last: Option<(f64, T)> = None;
    for &t in thresholds {
        if let Some((count, model)) = fit(t) {
            let enough = count > min_inliers_exclusive;
            last = Some((t, model));
            if enough {
                break;
            }
        }
    }
    last
}

/// A fitted projective transform with its supporting correspondences.
#[derive(Debug, Clone)]
pub struct HomographyEstimate {
    /// Maps match-image pixel coordinates to reference-image coordinates.
    pub transform: Matrix3<f64>,
    /// Correspondences consistent with the transform, in input order.
    pub inliers: Vec<Correspondence>,
    /// The sweep threshold the accepted fit used, in pixels.
    pub threshold_px: f64,
}

/// Estimate the match-to-reference transform from filtered correspondences.
///
/// RANSAC runs at each threshold of the configured sweep until a fit keeps
/// more than [`MIN_VIABLE_INLIERS`] correspondences. Loosening the
/// threshold rescues pairs whose matches are correct but imprecisely
/// localized (seasonal change, sensor differences).
pub fn estimate_transform(
    correspondences: &[Correspondence],
    config: &RansacConfig,
) -> Result<HomographyEstimate, HomographyError> {
    if correspondences.len() < 4 {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: correspondences.len(),
        });
    }

    let src: Vec<[f64; 2]> = correspondences.iter().map(|c| c.matched).collect();
    let dst: Vec<[f64; 2]> = correspondences.iter().map(|c| c.reference).collect();

    let schedule = config.threshold_schedule();
    let found = search_adaptive_threshold(&schedule, MIN_VIABLE_INLIERS, |threshold| {
        match fit_homography_ransac(&src, &dst, threshold, config) {
            Ok(fit) => {
                tracing::debug!(
                    "ransac at {} px: {} of {} inliers",
                    threshold,
                    fit.n_inliers,
                    correspondences.len()
                );
                Some((fit.n_inliers, fit))
            }
            Err(e) => {
                tracing::debug!("ransac at {} px failed: {}", threshold, e);
                None
            }
        }
    });

    let (threshold_px, fit) = found.ok_or(HomographyError::NoInliers)?;
    let inliers: Vec<Correspondence> = correspondences
        .iter()
        .zip(fit.inlier_mask.iter())
        .filter(|(_, &keep)| keep)
        .map(|(c, _)| *c)
        .collect();
    tracing::info!(
        "transform accepted at {} px threshold with {} inliers",
        threshold_px,
        inliers.len()
    );

    Ok(HomographyEstimate {
        transform: fit.h,
        inliers,
        threshold_px,
    })
}

// ── Tests ────────────────────────────────────────────────────────────────
