//! Pipeline configuration.
//!
//! Every tunable the pipeline consults lives here, grouped per stage and
//! carried by [`RegistrationConfig`]. Defaults reproduce the production
//! constants of the registration tool.

use serde::{Deserialize, Serialize};

/// Feature extraction parameters shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// One target feature per this many image pixels.
    pub pixels_per_feature: u64,
    /// Lower clamp on the per-image feature budget.
    pub min_features: usize,
    /// Upper clamp on the per-image feature budget.
    pub max_features: usize,
    /// FAST corner threshold for the binary backend.
    pub fast_threshold: u8,
    /// Harris corner response cutoff, as a fraction of the image maximum.
    pub harris_rel_threshold: f32,
    /// Harris determinant/trace weighting constant.
    pub harris_k: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            pixels_per_feature: 850,
            min_features: 3000,
            max_features: 15000,
            fast_threshold: 20,
            harris_rel_threshold: 0.01,
            harris_k: 0.04,
        }
    }
}

impl FeatureConfig {
    /// Adaptive per-image feature budget: `pixel_count / pixels_per_feature`,
    /// clamped to `[min_features, max_features]`.
    pub fn feature_budget(&self, pixel_count: u64) -> usize {
        ((pixel_count / self.pixels_per_feature) as usize).clamp(self.min_features, self.max_features)
    }
}

/// Match filtering parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Ratio test: keep the best match only if
    /// `best_distance < ratio * second_best_distance` (strict).
    pub ratio: f32,
    /// Drop a match once this many other matches share its query or train
    /// index. Minimum meaningful value is 2.
    pub duplicate_cutoff: usize,
    /// Minimum number of matches that must survive every filtering stage.
    pub min_matches: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ratio: 0.8,
            duplicate_cutoff: 2,
            min_matches: 3,
        }
    }
}

/// Robust homography fitting parameters, including the adaptive
/// inlier-threshold sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RansacConfig {
    /// First inlier distance threshold tried, in pixels.
    pub threshold_start_px: f64,
    /// Threshold increment per sweep iteration, in pixels.
    pub threshold_step_px: f64,
    /// Exclusive upper bound on the threshold sweep, in pixels.
    pub threshold_limit_px: f64,
    /// Maximum RANSAC iterations per threshold.
    pub max_iters: usize,
    /// Random seed for reproducible sampling.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            threshold_start_px: 5.0,
            threshold_step_px: 3.0,
            threshold_limit_px: 20.0,
            max_iters: 2000,
            seed: 0,
        }
    }
}

impl RansacConfig {
    /// The thresholds visited by the adaptive sweep, in order.
    pub fn threshold_schedule(&self) -> Vec<f64> {
        let mut out = Vec::new();
        let mut t = self.threshold_start_px;
        while t < self.threshold_limit_px {
            out.push(t);
            t += self.threshold_step_px;
        }
        out
    }
}

/// Inlier-count cutoffs for the confidence classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Counts strictly below this classify as no confidence.
    pub none_below: usize,
    /// Counts strictly above this classify as high confidence.
    pub high_above: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            none_below: 5,
            high_above: 25,
        }
    }
}

/// Top-level configuration for one registration call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub feature: FeatureConfig,
    pub filter: FilterConfig,
    pub ransac: RansacConfig,
    pub confidence: ConfidenceConfig,
    /// Relative scale difference below which [`crate::register_scaled`]
    /// skips resampling the match image.
    pub scale_tolerance: f64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            feature: FeatureConfig::default(),
            filter: FilterConfig::default(),
            ransac: RansacConfig::default(),
            confidence: ConfidenceConfig::default(),
            scale_tolerance: 0.10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_budget_clamps_small_images_up() {
        let cfg = FeatureConfig::default();
        // 1 Mpx / 850 ≈ 1176, below the lower clamp.
        assert_eq!(cfg.feature_budget(1_000_000), 3000);
    }

    #[test]
    fn feature_budget_clamps_large_images_down() {
        let cfg = FeatureConfig::default();
        // 20 Mpx / 850 ≈ 23529, above the upper clamp.
        assert_eq!(cfg.feature_budget(20_000_000), 15000);
    }

    #[test]
    fn feature_budget_scales_in_between() {
        let cfg = FeatureConfig::default();
        assert_eq!(cfg.feature_budget(8_500_000), 10_000);
    }

    #[test]
    fn threshold_schedule_stops_short_of_limit() {
        let cfg = RansacConfig::default();
        assert_eq!(cfg.threshold_schedule(), vec![5.0, 8.0, 11.0, 14.0, 17.0]);
    }
}
