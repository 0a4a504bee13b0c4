//! Float feature backend: Harris corners with a 128-dimensional gradient
//! orientation-histogram descriptor, matched by L2 distance.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;

use super::{Descriptors, FeatureBackend, FeatureSet, Keypoint};

type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Descriptor layout: a 16x16 rotated patch split into a 4x4 cell grid,
/// each cell an 8-bin orientation histogram.
const PATCH_SIZE: i32 = 16;
const GRID: usize = 4;
const ORIENTATION_BINS: usize = 8;
pub const DESCRIPTOR_LEN: usize = GRID * GRID * ORIENTATION_BINS;

/// Smoothing sigma for the Harris structure tensor.
const TENSOR_SIGMA: f32 = 1.5;

/// Harris corner detector with a SIFT-like patch descriptor.
pub struct PatchGradient {
    rel_threshold: f32,
    k: f32,
}

impl PatchGradient {
    pub fn new(rel_threshold: f32, k: f32) -> Self {
        Self { rel_threshold, k }
    }

    fn detect(&self, gx: &FloatImage, gy: &FloatImage, max_features: usize) -> Vec<Keypoint> {
        let (w, h) = gx.dimensions();

        // Structure tensor components, smoothed over the neighborhood.
        let mut ixx = FloatImage::new(w, h);
        let mut iyy = FloatImage::new(w, h);
        let mut ixy = FloatImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let dx = gx.get_pixel(x, y).0[0];
                let dy = gy.get_pixel(x, y).0[0];
                ixx.put_pixel(x, y, Luma([dx * dx]));
                iyy.put_pixel(x, y, Luma([dy * dy]));
                ixy.put_pixel(x, y, Luma([dx * dy]));
            }
        }
        let ixx = gaussian_blur_f32(&ixx, TENSOR_SIGMA);
        let iyy = gaussian_blur_f32(&iyy, TENSOR_SIGMA);
        let ixy = gaussian_blur_f32(&ixy, TENSOR_SIGMA);

        let mut response = vec![0.0f32; (w * h) as usize];
        let mut max_response = 0.0f32;
        for y in 0..h {
            for x in 0..w {
                let a = ixx.get_pixel(x, y).0[0];
                let b = iyy.get_pixel(x, y).0[0];
                let c = ixy.get_pixel(x, y).0[0];
                let det = a * b - c * c;
                let trace = a + b;
                let r = det - self.k * trace * trace;
                response[(y * w + x) as usize] = r;
                if r > max_response {
                    max_response = r;
                }
            }
        }
        if max_response <= 0.0 {
            return Vec::new();
        }
        let cutoff = self.rel_threshold * max_response;

        // 3x3 local maxima above the relative cutoff. The border margin
        // keeps the descriptor patch inside the image.
        let margin = (PATCH_SIZE / 2 + 1).max(1) as u32;
        if w <= 2 * margin || h <= 2 * margin {
            return Vec::new();
        }
        let mut corners = Vec::new();
        for y in margin..(h - margin) {
            for x in margin..(w - margin) {
                let r = response[(y * w + x) as usize];
                if r <= cutoff {
                    continue;
                }
                let mut is_max = true;
                'nbr: for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = (x as i32 + dx) as u32;
                        let ny = (y as i32 + dy) as u32;
                        if response[(ny * w + nx) as usize] > r {
                            is_max = false;
                            break 'nbr;
                        }
                    }
                }
                if is_max {
                    corners.push(Keypoint {
                        x: x as f32,
                        y: y as f32,
                        response: r,
                        angle: 0.0,
                    });
                }
            }
        }

        corners.sort_by(|a, b| b.response.total_cmp(&a.response));
        corners.truncate(max_features);
        for kp in corners.iter_mut() {
            kp.angle = dominant_orientation(gx, gy, kp.x as i32, kp.y as i32);
        }
        corners
    }

    fn describe(&self, gx: &FloatImage, gy: &FloatImage, keypoints: &[Keypoint]) -> Vec<Vec<f32>> {
        keypoints
            .iter()
            .map(|kp| describe_patch(gx, gy, kp))
            .collect()
    }
}

impl FeatureBackend for PatchGradient {
    fn extract(&self, image: &GrayImage, max_features: usize) -> FeatureSet {
        let (gx, gy) = gradients(image);
        let keypoints = self.detect(&gx, &gy, max_features);
        let descriptors = self.describe(&gx, &gy, &keypoints);
        FeatureSet::new(keypoints, Descriptors::Float(descriptors))
    }
}

/// Central-difference image gradients with replicated borders.
fn gradients(image: &GrayImage) -> (FloatImage, FloatImage) {
    let (w, h) = image.dimensions();
    let at = |x: i32, y: i32| -> f32 {
        let x = x.clamp(0, w as i32 - 1) as u32;
        let y = y.clamp(0, h as i32 - 1) as u32;
        image.get_pixel(x, y).0[0] as f32
    };
    let mut gx = FloatImage::new(w, h);
    let mut gy = FloatImage::new(w, h);
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            gx.put_pixel(x as u32, y as u32, Luma([(at(x + 1, y) - at(x - 1, y)) * 0.5]));
            gy.put_pixel(x as u32, y as u32, Luma([(at(x, y + 1) - at(x, y - 1)) * 0.5]));
        }
    }
    (gx, gy)
}

/// Orientation of the summed gradient over a small patch around the corner.
fn dominant_orientation(gx: &FloatImage, gy: &FloatImage, cx: i32, cy: i32) -> f32 {
    let (w, h) = gx.dimensions();
    let mut sx = 0.0f32;
    let mut sy = 0.0f32;
    for dy in -4i32..=4 {
        for dx in -4i32..=4 {
            let x = (cx + dx).clamp(0, w as i32 - 1) as u32;
            let y = (cy + dy).clamp(0, h as i32 - 1) as u32;
            sx += gx.get_pixel(x, y).0[0];
            sy += gy.get_pixel(x, y).0[0];
        }
    }
    sy.atan2(sx)
}

/// Magnitude-weighted orientation histogram over a rotated 16x16 patch.
/// Gradient orientations are expressed relative to the keypoint angle so
/// the descriptor is rotation-invariant. All entries are non-negative.
fn describe_patch(gx: &FloatImage, gy: &FloatImage, kp: &Keypoint) -> Vec<f32> {
    let (w, h) = gx.dimensions();
    let (sin, cos) = kp.angle.sin_cos();
    let half = PATCH_SIZE / 2;
    let cell = PATCH_SIZE as usize / GRID;
    let mut desc = vec![0.0f32; DESCRIPTOR_LEN];

    for py in 0..PATCH_SIZE {
        for px in 0..PATCH_SIZE {
            let u = (px - half) as f32 + 0.5;
            let v = (py - half) as f32 + 0.5;
            // Patch coordinates rotated into image space.
            let ix = (kp.x + cos * u - sin * v).round().clamp(0.0, w as f32 - 1.0) as u32;
            let iy = (kp.y + sin * u + cos * v).round().clamp(0.0, h as f32 - 1.0) as u32;
            let dx = gx.get_pixel(ix, iy).0[0];
            let dy = gy.get_pixel(ix, iy).0[0];
            let magnitude = (dx * dx + dy * dy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            let mut theta = dy.atan2(dx) - kp.angle;
            let tau = std::f32::consts::TAU;
            theta = theta.rem_euclid(tau);
            let bin = ((theta / tau) * ORIENTATION_BINS as f32) as usize % ORIENTATION_BINS;

            let cell_x = (px as usize / cell).min(GRID - 1);
            let cell_y = (py as usize / cell).min(GRID - 1);
            desc[(cell_y * GRID + cell_x) * ORIENTATION_BINS + bin] += magnitude;
        }
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blobs(w: u32, h: u32, period: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let inside = (x % period) < period / 2 && (y % period) < period / 2;
            Luma([if inside { 220 } else { 30 }])
        })
    }

    #[test]
    fn detects_corners_on_blob_grid() {
        let img = blobs(128, 128, 16);
        let set = PatchGradient::new(0.01, 0.04).extract(&img, 1000);
        assert!(set.len() >= 10, "only {} corners found", set.len());
        assert_eq!(set.keypoints.len(), set.descriptors.len());
    }

    #[test]
    fn flat_image_yields_nothing() {
        let img = GrayImage::from_pixel(64, 64, Luma([120]));
        let set = PatchGradient::new(0.01, 0.04).extract(&img, 1000);
        assert!(set.is_empty());
    }

    #[test]
    fn descriptors_have_fixed_length_and_are_nonnegative() {
        let img = blobs(96, 96, 12);
        let set = PatchGradient::new(0.01, 0.04).extract(&img, 200);
        match set.descriptors {
            Descriptors::Float(ref d) => {
                assert!(!d.is_empty());
                for v in d {
                    assert_eq!(v.len(), DESCRIPTOR_LEN);
                    assert!(v.iter().all(|&x| x >= 0.0));
                }
            }
            Descriptors::Binary(_) => panic!("float descriptors expected"),
        }
    }

    #[test]
    fn budget_caps_corner_count() {
        let img = super::super::tests::noise_image(160, 160, 9);
        let set = PatchGradient::new(0.001, 0.04).extract(&img, 25);
        assert!(set.len() <= 25);
    }
}
