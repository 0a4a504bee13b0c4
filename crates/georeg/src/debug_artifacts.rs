//! Optional per-stage debug imagery.
//!
//! When a sink is attached the pipeline drops intermediate images next to
//! the output: the preprocessed pair, keypoint overlays, match
//! visualizations for each filter stage, and a warped overlay of the match
//! image on the reference. Artifact writes are best-effort; a failed save
//! is logged and never aborts the registration.

use std::path::{Path, PathBuf};

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use nalgebra::Matrix3;

use crate::feature::Keypoint;
use crate::homography::project;
use crate::matching::Correspondence;

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 80, 80]),
    Rgb([80, 220, 80]),
    Rgb([90, 130, 255]),
    Rgb([240, 200, 40]),
    Rgb([220, 90, 220]),
    Rgb([70, 220, 220]),
];

/// Destination directory for debug imagery.
pub struct ArtifactSink {
    dir: PathBuf,
}

impl ArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("cannot create artifact directory {}: {}", dir.display(), e);
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn save(&self, name: &str, image: &RgbImage) {
        let path = self.path(name);
        if let Err(e) = image.save(&path) {
            tracing::warn!("failed to write artifact {}: {}", path.display(), e);
        }
    }

    /// Save a preprocessed grayscale image as-is.
    pub fn save_gray(&self, name: &str, image: &GrayImage) {
        let path = self.path(name);
        if let Err(e) = image.save(&path) {
            tracing::warn!("failed to write artifact {}: {}", path.display(), e);
        }
    }

    /// Save the image with a circle on every keypoint.
    pub fn save_keypoints(&self, name: &str, image: &GrayImage, keypoints: &[Keypoint]) {
        let mut canvas = gray_to_rgb(image);
        for (i, kp) in keypoints.iter().enumerate() {
            let color = PALETTE[i % PALETTE.len()];
            draw_hollow_circle_mut(&mut canvas, (kp.x as i32, kp.y as i32), 4, color);
        }
        self.save(name, &canvas);
    }

    /// Save the two images side by side with a line per correspondence.
    pub fn save_matches(
        &self,
        name: &str,
        reference: &GrayImage,
        matched: &GrayImage,
        pairs: &[Correspondence],
    ) {
        let w = reference.width() + matched.width();
        let h = reference.height().max(matched.height());
        let mut canvas = RgbImage::new(w, h);
        blit_gray(&mut canvas, reference, 0);
        blit_gray(&mut canvas, matched, reference.width());

        let offset = reference.width() as f32;
        for (i, c) in pairs.iter().enumerate() {
            let color = PALETTE[i % PALETTE.len()];
            let from = (c.reference[0] as f32, c.reference[1] as f32);
            let to = (c.matched[0] as f32 + offset, c.matched[1] as f32);
            draw_line_segment_mut(&mut canvas, from, to, color);
            draw_hollow_circle_mut(&mut canvas, (from.0 as i32, from.1 as i32), 3, color);
            draw_hollow_circle_mut(&mut canvas, (to.0 as i32, to.1 as i32), 3, color);
        }
        self.save(name, &canvas);
    }

    /// Warp the match image onto the reference frame and save a 50% blend.
    ///
    /// `transform` maps match coordinates to reference coordinates, so the
    /// warp samples through its inverse. Reference pixels with no warped
    /// counterpart (outside the match footprint, or warped from pure-black
    /// background) pass through unchanged.
    pub fn save_warp_blend(
        &self,
        name: &str,
        reference: &GrayImage,
        matched: &GrayImage,
        transform: &Matrix3<f64>,
    ) {
        let inverse = match transform.try_inverse() {
            Some(inv) => inv,
            None => {
                tracing::warn!("transform not invertible, skipping warp artifact");
                return;
            }
        };
        let blended = warp_blend(reference, matched, &inverse);
        self.save(name, &gray_to_rgb(&blended));
    }

    /// Serialize a JSON summary of the run.
    pub fn save_summary(&self, name: &str, summary: &impl serde::Serialize) {
        let path = self.path(name);
        let write = || -> Result<(), Box<dyn std::error::Error>> {
            let file = std::fs::File::create(&path)?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), summary)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!("failed to write artifact {}: {}", path.display(), e);
        }
    }
}

fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

fn blit_gray(canvas: &mut RgbImage, src: &GrayImage, x_offset: u32) {
    for (x, y, p) in src.enumerate_pixels() {
        let v = p.0[0];
        canvas.put_pixel(x + x_offset, y, Rgb([v, v, v]));
    }
}

/// Inverse-map the match image into the reference frame and blend.
fn warp_blend(reference: &GrayImage, matched: &GrayImage, inverse: &Matrix3<f64>) -> GrayImage {
    let (mw, mh) = matched.dimensions();
    GrayImage::from_fn(reference.width(), reference.height(), |x, y| {
        let ref_v = reference.get_pixel(x, y).0[0];
        let p = project(inverse, x as f64, y as f64);
        let mx = p[0].round();
        let my = p[1].round();
        if !mx.is_finite() || mx < 0.0 || my < 0.0 || mx >= mw as f64 || my >= mh as f64 {
            return image::Luma([ref_v]);
        }
        let warped = matched.get_pixel(mx as u32, my as u32).0[0];
        if warped == 0 {
            // Pure black marks resample background, not scene content.
            return image::Luma([ref_v]);
        }
        image::Luma([((ref_v as u16 + warped as u16) / 2) as u8])
    })
}
