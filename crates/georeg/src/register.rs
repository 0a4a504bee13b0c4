//! Pipeline orchestration.
//!
//! [`register`] wires the stages together: preprocess both images, extract
//! features, match and filter descriptors, fit the transform, classify
//! confidence. [`register_scaled`] wraps it for image pairs with a known
//! resolution ratio.

use image::{imageops::FilterType, DynamicImage};
use serde::Serialize;

use crate::config::RegistrationConfig;
use crate::confidence::Confidence;
use crate::debug_artifacts::ArtifactSink;
use crate::feature::{self, ExtractionError, ExtractionMode};
use crate::homography::{estimate_transform, HomographyError};
use crate::matching::{
    filter_matches, match_two_nn, resolve_correspondences, Correspondence, MatchError,
};
use crate::preprocess::{preprocess, PreprocessError};
use crate::rotation::estimate_relative_rotation;

/// Which input image an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSide {
    Reference,
    Match,
}

impl std::fmt::Display for ImageSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "reference image"),
            Self::Match => write!(f, "match image"),
        }
    }
}

#[derive(Debug)]
pub enum RegisterError {
    Preprocess {
        side: ImageSide,
        source: PreprocessError,
    },
    Extraction {
        side: ImageSide,
        source: ExtractionError,
    },
    Matching(MatchError),
    Homography(HomographyError),
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preprocess { side, source } => write!(f, "preprocessing {} failed: {}", side, source),
            Self::Extraction { side, source } => {
                write!(f, "feature extraction on {} failed: {}", side, source)
            }
            Self::Matching(e) => write!(f, "match filtering failed: {}", e),
            Self::Homography(e) => write!(f, "transform estimation failed: {}", e),
        }
    }
}

impl std::error::Error for RegisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Preprocess { source, .. } => Some(source),
            Self::Extraction { source, .. } => Some(source),
            Self::Matching(e) => Some(e),
            Self::Homography(e) => Some(e),
        }
    }
}

impl From<MatchError> for RegisterError {
    fn from(e: MatchError) -> Self {
        Self::Matching(e)
    }
}

impl From<HomographyError> for RegisterError {
    fn from(e: HomographyError) -> Self {
        Self::Homography(e)
    }
}

/// The output of one registration run.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Maps match-image pixel coordinates to reference-image coordinates.
    pub transform: nalgebra::Matrix3<f64>,
    /// Correspondences consistent with the transform.
    pub inliers: Vec<Correspondence>,
    /// Trust classification derived from the inlier count.
    pub confidence: Confidence,
    /// Inlier threshold the accepted fit used, in pixels.
    pub threshold_px: f64,
}

#[derive(Serialize)]
struct RunSummary {
    mode: ExtractionMode,
    reference_features: usize,
    match_features: usize,
    filtered_matches: usize,
    inliers: usize,
    threshold_px: f64,
    confidence: Confidence,
    rotation_deg: Option<f64>,
}

/// Register `matched` against `reference`, producing the transform that
/// maps match-image pixels into the reference frame.
pub fn register(
    reference: &DynamicImage,
    matched: &DynamicImage,
    mode: ExtractionMode,
    config: &RegistrationConfig,
) -> Result<RegistrationResult, RegisterError> {
    register_inner(reference, matched, mode, config, None)
}

/// [`register`], additionally writing per-stage debug imagery to `sink`.
pub fn register_with_artifacts(
    reference: &DynamicImage,
    matched: &DynamicImage,
    mode: ExtractionMode,
    config: &RegistrationConfig,
    sink: &ArtifactSink,
) -> Result<RegistrationResult, RegisterError> {
    register_inner(reference, matched, mode, config, Some(sink))
}

fn register_inner(
    reference: &DynamicImage,
    matched: &DynamicImage,
    mode: ExtractionMode,
    config: &RegistrationConfig,
    sink: Option<&ArtifactSink>,
) -> Result<RegistrationResult, RegisterError> {
    let ref_gray = preprocess(reference).map_err(|source| RegisterError::Preprocess {
        side: ImageSide::Reference,
        source,
    })?;
    let match_gray = preprocess(matched).map_err(|source| RegisterError::Preprocess {
        side: ImageSide::Match,
        source,
    })?;
    if let Some(sink) = sink {
        sink.save_gray("preprocessed_reference.png", &ref_gray);
        sink.save_gray("preprocessed_match.png", &match_gray);
    }

    let ref_features =
        feature::extract(&ref_gray, mode, &config.feature).map_err(|source| {
            RegisterError::Extraction {
                side: ImageSide::Reference,
                source,
            }
        })?;
    let match_features =
        feature::extract(&match_gray, mode, &config.feature).map_err(|source| {
            RegisterError::Extraction {
                side: ImageSide::Match,
                source,
            }
        })?;
    tracing::info!(
        "extracted {} reference and {} match features ({} mode)",
        ref_features.len(),
        match_features.len(),
        mode
    );
    if let Some(sink) = sink {
        sink.save_keypoints("keypoints_reference.png", &ref_gray, &ref_features.keypoints);
        sink.save_keypoints("keypoints_match.png", &match_gray, &match_features.keypoints);
    }

    let candidates = match_two_nn(&ref_features.descriptors, &match_features.descriptors)?;
    if let Some(sink) = sink {
        let raw: Vec<Correspondence> = candidates
            .iter()
            .map(|m| Correspondence {
                reference: ref_features.keypoints[m.query].point(),
                matched: match_features.keypoints[m.train].point(),
            })
            .collect();
        sink.save_matches("matches_raw.png", &ref_gray, &match_gray, &raw);
    }

    let kept = filter_matches(
        &candidates,
        ref_features.len(),
        match_features.len(),
        &config.filter,
    )?;
    let correspondences = resolve_correspondences(&kept, &ref_features, &match_features);
    if let Some(sink) = sink {
        sink.save_matches("matches_filtered.png", &ref_gray, &match_gray, &correspondences);
    }

    let estimate = estimate_transform(&correspondences, &config.ransac)?;
    let confidence = Confidence::from_inlier_count(estimate.inliers.len(), &config.confidence);
    tracing::info!(
        "registration finished: {} inliers, {}",
        estimate.inliers.len(),
        confidence
    );

    if let Some(sink) = sink {
        sink.save_matches("matches_inliers.png", &ref_gray, &match_gray, &estimate.inliers);
        sink.save_warp_blend("warp_overlay.png", &ref_gray, &match_gray, &estimate.transform);

        let rotation_deg = estimate_relative_rotation(&estimate.inliers);
        match rotation_deg {
            Some(deg) => tracing::debug!("estimated relative rotation: {:.1} degrees", deg),
            None => tracing::debug!("no dominant relative rotation"),
        }
        sink.save_summary(
            "registration_summary.json",
            &RunSummary {
                mode,
                reference_features: ref_features.len(),
                match_features: match_features.len(),
                filtered_matches: correspondences.len(),
                inliers: estimate.inliers.len(),
                threshold_px: estimate.threshold_px,
                confidence,
                rotation_deg,
            },
        );
    }

    Ok(RegistrationResult {
        transform: estimate.transform,
        inliers: estimate.inliers,
        confidence,
        threshold_px: estimate.threshold_px,
    })
}

/// Register an image pair whose resolutions differ by a known factor.
///
/// `scale` is the factor that brings match-image pixels to reference
/// resolution. Within `scale_tolerance` of 1.0 the images are registered
/// as-is; otherwise the match image is resampled first and the result is
/// mapped back into original match-image coordinates, so callers always
/// receive a transform and inliers in the unscaled frames.
pub fn register_scaled(
    reference: &DynamicImage,
    matched: &DynamicImage,
    mode: ExtractionMode,
    config: &RegistrationConfig,
    scale: f64,
) -> Result<RegistrationResult, RegisterError> {
    if (scale - 1.0).abs() < config.scale_tolerance {
        return register(reference, matched, mode, config);
    }

    let nw = ((matched.width() as f64 * scale).round() as u32).max(1);
    let nh = ((matched.height() as f64 * scale).round() as u32).max(1);
    tracing::info!(
        "resampling match image by {:.3} to {}x{} before registration",
        scale,
        nw,
        nh
    );
    let resized = matched.resize_exact(nw, nh, FilterType::Triangle);

    let mut result = register(reference, &resized, mode, config)?;
    descale(&mut result, scale);
    Ok(result)
}

/// Rewrite a result computed on a resampled match image so it applies to
/// the original one. The transform picks up the scale on its first two
/// columns; inlier match coordinates shrink back.
fn descale(result: &mut RegistrationResult, scale: f64) {
    for row in 0..3 {
        result.transform[(row, 0)] *= scale;
        result.transform[(row, 1)] *= scale;
    }
    for c in result.inliers.iter_mut() {
        c.matched[0] /= scale;
        c.matched[1] /= scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homography::project;
    use approx::assert_relative_eq;
    use image::{GrayImage, Luma};
    use rand::{Rng, SeedableRng};

    fn textured_image(w: u32, h: u32, seed: u64) -> DynamicImage {
        // Block noise gives FAST corners and stable descriptors.
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let blocks_w = w / 4 + 1;
        let values: Vec<u8> = (0..blocks_w * (h / 4 + 1))
            .map(|_| rng.gen_range(0u8..=255u8))
            .collect();
        let img = GrayImage::from_fn(w, h, |x, y| {
            Luma([values[((y / 4) * blocks_w + x / 4) as usize]])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn self_registration_is_identity_with_high_confidence() {
        let img = textured_image(300, 300, 21);
        let result = register(
            &img,
            &img,
            ExtractionMode::Fast,
            &RegistrationConfig::default(),
        )
        .unwrap();

        assert_eq!(result.confidence, Confidence::High);
        for &[x, y] in &[[20.0, 20.0], [280.0, 20.0], [150.0, 280.0]] {
            let p = project(&result.transform, x, y);
            assert_relative_eq!(p[0], x, epsilon = 1.0);
            assert_relative_eq!(p[1], y, epsilon = 1.0);
        }
    }

    #[test]
    fn constant_image_fails_in_preprocessing() {
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([77])));
        let good = textured_image(64, 64, 1);
        match register(&good, &flat, ExtractionMode::Fast, &RegistrationConfig::default()) {
            Err(RegisterError::Preprocess {
                side: ImageSide::Match,
                ..
            }) => {}
            other => panic!("expected match-side preprocess failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn smooth_image_fails_in_extraction() {
        // A ramp survives the contrast stretch but offers no corners.
        let ramp = DynamicImage::ImageLuma8(GrayImage::from_fn(128, 128, |x, _| Luma([x as u8])));
        let good = textured_image(128, 128, 2);
        match register(&good, &ramp, ExtractionMode::Fast, &RegistrationConfig::default()) {
            Err(RegisterError::Extraction {
                side: ImageSide::Match,
                ..
            }) => {}
            other => panic!("expected match-side extraction failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn descale_rescales_transform_and_inliers() {
        let mut result = RegistrationResult {
            transform: nalgebra::Matrix3::new(
                1.0, 0.2, 30.0,
                -0.1, 1.0, 40.0,
                0.001, 0.002, 1.0,
            ),
            inliers: vec![Correspondence {
                reference: [100.0, 200.0],
                matched: [50.0, 60.0],
            }],
            confidence: Confidence::High,
            threshold_px: 5.0,
        };
        descale(&mut result, 2.0);

        assert_relative_eq!(result.transform[(0, 0)], 2.0);
        assert_relative_eq!(result.transform[(1, 1)], 2.0);
        assert_relative_eq!(result.transform[(2, 0)], 0.002);
        // Third column untouched.
        assert_relative_eq!(result.transform[(0, 2)], 30.0);
        assert_relative_eq!(result.transform[(2, 2)], 1.0);
        assert_eq!(result.inliers[0].matched, [25.0, 30.0]);
        assert_eq!(result.inliers[0].reference, [100.0, 200.0]);
    }

    #[test]
    fn descaled_transform_projects_original_coordinates() {
        // If H maps resampled coords and x_r = s * x, the descaled matrix
        // must send original match coords to the same reference points.
        let h = nalgebra::Matrix3::new(
            1.1, 0.05, 12.0,
            -0.02, 0.95, -7.0,
            0.0002, 0.0001, 1.0,
        );
        let scale = 2.5;
        let mut result = RegistrationResult {
            transform: h,
            inliers: Vec::new(),
            confidence: Confidence::Low,
            threshold_px: 5.0,
        };
        descale(&mut result, scale);

        let original = [40.0, 24.0];
        let resampled = [original[0] * scale, original[1] * scale];
        let expected = project(&h, resampled[0], resampled[1]);
        let got = project(&result.transform, original[0], original[1]);
        assert_relative_eq!(got[0], expected[0], epsilon = 1e-9);
        assert_relative_eq!(got[1], expected[1], epsilon = 1e-9);
    }

    #[test]
    fn near_unit_scale_skips_resampling() {
        let img = textured_image(220, 220, 33);
        let direct = register(&img, &img, ExtractionMode::Fast, &RegistrationConfig::default())
            .unwrap();
        let scaled = register_scaled(
            &img,
            &img,
            ExtractionMode::Fast,
            &RegistrationConfig::default(),
            1.05,
        )
        .unwrap();
        assert_eq!(scaled.transform, direct.transform);
        assert_eq!(scaled.inliers.len(), direct.inliers.len());
    }
}
