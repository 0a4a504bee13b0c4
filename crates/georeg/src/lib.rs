//! georeg — feature-based registration of raster images against a basemap.
//!
//! Given a reference image and a new "match" image of the same scene
//! (possibly from a different sensor, season, or viewpoint), the pipeline
//! estimates a 3×3 projective transform mapping match-image pixel
//! coordinates onto reference-image coordinates. The stages are:
//!
//! 1. **Preprocess** – grayscale conversion + percentile contrast stretch.
//! 2. **Features** – adaptive-budget keypoint/descriptor extraction through
//!    a backend capability ([`FeatureBackend`]), selected per
//!    [`ExtractionMode`].
//! 3. **Matching** – brute-force two-nearest-neighbor search, ratio test,
//!    index validation, duplicate suppression.
//! 4. **Homography** – RANSAC projective fit with an adaptive
//!    inlier-threshold sweep.
//! 5. **Confidence** – inlier-count classification into none/low/high.
//!
//! # Public API
//! [`register`] and [`register_scaled`] are the primary entry points;
//! [`RegistrationConfig`] exposes every tunable. [`report`] reads and
//! writes the plain-text result format consumed by downstream tooling.

pub mod config;
pub mod confidence;
pub mod debug_artifacts;
pub mod feature;
pub mod homography;
pub mod matching;
pub mod preprocess;
pub mod register;
pub mod report;
pub mod rotation;

pub use config::{ConfidenceConfig, FeatureConfig, FilterConfig, RansacConfig, RegistrationConfig};
pub use confidence::Confidence;
pub use debug_artifacts::ArtifactSink;
pub use feature::{ExtractionMode, FeatureBackend, FeatureSet, Keypoint};
pub use homography::HomographyEstimate;
pub use matching::Correspondence;
pub use register::{
    register, register_scaled, register_with_artifacts, ImageSide, RegisterError,
    RegistrationResult,
};
