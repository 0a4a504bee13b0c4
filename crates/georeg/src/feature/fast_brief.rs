//! Binary feature backend: FAST-9 corners with rotated 256-bit binary
//! descriptors, matched by Hamming distance.

use image::GrayImage;
use rand::{Rng, SeedableRng};

use super::{Descriptors, FeatureBackend, FeatureSet, Keypoint};

/// Bresenham circle of radius 3 used by the segment test, in clockwise
/// order starting from the top.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required for a positive segment test.
const ARC_LENGTH: usize = 9;

/// Half-width of the descriptor sampling patch.
const PATCH_RADIUS: i32 = 13;

/// Radius of the intensity-centroid orientation patch.
const ORIENTATION_RADIUS: i32 = 7;

/// Minimum spacing between retained corners, in pixels.
const NMS_RADIUS: f32 = 5.0;

const DESCRIPTOR_BITS: usize = 256;

/// Fixed seed for the binary test pattern, shared by every extraction so
/// descriptors from different images are comparable.
const PATTERN_SEED: u64 = 0x1BADB002;

/// FAST-9 corner detector paired with a rotation-aware binary descriptor.
pub struct FastBrief {
    threshold: u8,
    pattern: Vec<[i32; 4]>,
}

impl FastBrief {
    pub fn new(threshold: u8) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(PATTERN_SEED);
        let pattern = (0..DESCRIPTOR_BITS)
            .map(|_| {
                [
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                ]
            })
            .collect();
        Self { threshold, pattern }
    }

    fn detect(&self, image: &GrayImage, max_features: usize) -> Vec<Keypoint> {
        let (w, h) = image.dimensions();
        if w < 7 || h < 7 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let t = self.threshold as i32;
        for y in 3..(h - 3) {
            for x in 3..(w - 3) {
                let center = image.get_pixel(x, y).0[0] as i32;
                let ring: Vec<i32> = CIRCLE
                    .iter()
                    .map(|&(dx, dy)| {
                        image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0] as i32
                    })
                    .collect();

                if !segment_test(center, &ring, t) {
                    continue;
                }
                let response: i32 = ring.iter().map(|&p| (p - center).abs()).sum();
                candidates.push(Keypoint {
                    x: x as f32,
                    y: y as f32,
                    response: response as f32,
                    angle: 0.0,
                });
            }
        }

        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
        let mut kept = non_max_suppress(&candidates, NMS_RADIUS, max_features);
        for kp in kept.iter_mut() {
            kp.angle = intensity_centroid_angle(image, kp.x as i32, kp.y as i32);
        }
        kept
    }

    fn describe(&self, image: &GrayImage, keypoints: &[Keypoint]) -> Vec<[u8; 32]> {
        keypoints
            .iter()
            .map(|kp| {
                let (sin, cos) = kp.angle.sin_cos();
                let mut desc = [0u8; 32];
                for (bit, test) in self.pattern.iter().enumerate() {
                    let a = sample_rotated(image, kp, test[0], test[1], sin, cos);
                    let b = sample_rotated(image, kp, test[2], test[3], sin, cos);
                    if a > b {
                        desc[bit / 8] |= 1 << (bit % 8);
                    }
                }
                desc
            })
            .collect()
    }
}

impl FeatureBackend for FastBrief {
    fn extract(&self, image: &GrayImage, max_features: usize) -> FeatureSet {
        let keypoints = self.detect(image, max_features);
        let descriptors = self.describe(image, &keypoints);
        FeatureSet::new(keypoints, Descriptors::Binary(descriptors))
    }
}

/// True if at least [`ARC_LENGTH`] contiguous ring pixels are all brighter
/// than `center + t` or all darker than `center - t`. The ring is scanned
/// doubled so arcs wrapping past index 15 are counted.
fn segment_test(center: i32, ring: &[i32], t: i32) -> bool {
    let mut bright_run = 0usize;
    let mut dark_run = 0usize;
    for i in 0..(ring.len() * 2) {
        let p = ring[i % ring.len()];
        if p > center + t {
            bright_run += 1;
            dark_run = 0;
        } else if p < center - t {
            dark_run += 1;
            bright_run = 0;
        } else {
            bright_run = 0;
            dark_run = 0;
        }
        if bright_run >= ARC_LENGTH || dark_run >= ARC_LENGTH {
            return true;
        }
    }
    false
}

/// Greedy spatial suppression over response-sorted candidates. A coarse
/// occupancy grid keeps the neighbor check constant-time per candidate.
fn non_max_suppress(sorted: &[Keypoint], radius: f32, max_features: usize) -> Vec<Keypoint> {
    use std::collections::HashMap;

    let cell = radius.max(1.0);
    let mut grid: HashMap<(i64, i64), Vec<(f32, f32)>> = HashMap::new();
    let mut kept = Vec::new();
    let r2 = radius * radius;

    for kp in sorted {
        if kept.len() >= max_features {
            break;
        }
        let cx = (kp.x / cell).floor() as i64;
        let cy = (kp.y / cell).floor() as i64;
        let mut blocked = false;
        'scan: for gx in (cx - 1)..=(cx + 1) {
            for gy in (cy - 1)..=(cy + 1) {
                if let Some(pts) = grid.get(&(gx, gy)) {
                    for &(px, py) in pts {
                        let dx = kp.x - px;
                        let dy = kp.y - py;
                        if dx * dx + dy * dy < r2 {
                            blocked = true;
                            break 'scan;
                        }
                    }
                }
            }
        }
        if !blocked {
            grid.entry((cx, cy)).or_default().push((kp.x, kp.y));
            kept.push(*kp);
        }
    }
    kept
}

/// Dominant orientation from the intensity centroid of a circular patch.
fn intensity_centroid_angle(image: &GrayImage, cx: i32, cy: i32) -> f32 {
    let (w, h) = image.dimensions();
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;
    let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let x = (cx + dx).clamp(0, w as i32 - 1) as u32;
            let y = (cy + dy).clamp(0, h as i32 - 1) as u32;
            let v = image.get_pixel(x, y).0[0] as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

fn sample_rotated(image: &GrayImage, kp: &Keypoint, dx: i32, dy: i32, sin: f32, cos: f32) -> u8 {
    let rx = cos * dx as f32 - sin * dy as f32;
    let ry = sin * dx as f32 + cos * dy as f32;
    let (w, h) = image.dimensions();
    let x = (kp.x + rx).round().clamp(0.0, w as f32 - 1.0) as u32;
    let y = (kp.y + ry).round().clamp(0.0, h as f32 - 1.0) as u32;
    image.get_pixel(x, y).0[0]
}
