//! Feature extraction boundary.
//!
//! The registration core never names a concrete detector: it asks a
//! [`FeatureBackend`] for keypoints and descriptors and matches whatever
//! comes back. [`ExtractionMode`] selects between the two shipped
//! backends: a binary-descriptor detector for fast runs and a
//! floating-point one for accurate runs.

mod fast_brief;
mod patch_gradient;

pub use fast_brief::FastBrief;
pub use patch_gradient::PatchGradient;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;

/// Detector/descriptor strategy for one registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMode {
    /// Binary descriptors, Hamming matching.
    Fast,
    /// Floating-point descriptors with RootSift normalization, L2 matching.
    Accurate,
}

impl std::fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Accurate => write!(f, "accurate"),
        }
    }
}

/// A detected image feature location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Column, in pixels.
    pub x: f32,
    /// Row, in pixels.
    pub y: f32,
    /// Detector response; larger is stronger.
    pub response: f32,
    /// Dominant orientation in radians.
    pub angle: f32,
}

impl Keypoint {
    pub fn point(&self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }
}

/// Descriptor storage for one image. The variant fixes the distance metric
/// used during matching (Hamming for binary, L2 for float).
#[derive(Debug, Clone)]
pub enum Descriptors {
    Binary(Vec<[u8; 32]>),
    Float(Vec<Vec<f32>>),
}

impl Descriptors {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(d) => d.len(),
            Self::Float(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keypoints paired 1:1 with their descriptors by index.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl FeatureSet {
    /// Pair keypoints with descriptors. Both sides must have equal length;
    /// a mismatch is a backend bug, not a recoverable condition.
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Self {
        assert_eq!(
            keypoints.len(),
            descriptors.len(),
            "keypoint/descriptor count mismatch"
        );
        Self {
            keypoints,
            descriptors,
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detector/descriptor capability consumed by the orchestrator.
pub trait FeatureBackend {
    /// Detect up to `max_features` keypoints and compute their descriptors.
    fn extract(&self, image: &GrayImage, max_features: usize) -> FeatureSet;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The detector found no keypoints at all.
    NoFeatures,
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFeatures => write!(f, "no features detected in image"),
        }
    }
}

impl std::error::Error for ExtractionError {}

/// Build the backend bound to `mode`.
pub fn backend_for(mode: ExtractionMode, config: &FeatureConfig) -> Box<dyn FeatureBackend> {
    match mode {
        ExtractionMode::Fast => Box::new(FastBrief::new(config.fast_threshold)),
        ExtractionMode::Accurate => Box::new(PatchGradient::new(
            config.harris_rel_threshold,
            config.harris_k,
        )),
    }
}

/// Extract features with the adaptive budget for this image size.
///
/// In accurate mode the float descriptors are RootSift-normalized before
/// they are returned, so both images of a pair see the identical
/// transform.
pub fn extract(
    image: &GrayImage,
    mode: ExtractionMode,
    config: &FeatureConfig,
) -> Result<FeatureSet, ExtractionError> {
    let pixel_count = image.width() as u64 * image.height() as u64;
    let budget = config.feature_budget(pixel_count);
    tracing::debug!(
        "extracting up to {} features ({} px, {} mode)",
        budget,
        pixel_count,
        mode
    );

    let mut set = backend_for(mode, config).extract(image, budget);
    if set.is_empty() {
        return Err(ExtractionError::NoFeatures);
    }

    if let Descriptors::Float(ref mut descriptors) = set.descriptors {
        root_sift(descriptors);
    }
    Ok(set)
}

/// RootSift normalization: L1-normalize each descriptor, then take the
/// element-wise square root. All inputs are non-negative by construction.
pub fn root_sift(descriptors: &mut [Vec<f32>]) {
    for d in descriptors.iter_mut() {
        let mut norm1: f32 = d.iter().sum();
        if norm1 == 0.0 {
            norm1 = 1e-8;
        }
        for v in d.iter_mut() {
            *v = (*v / norm1).sqrt();
        }
    }
}
