//! Image preprocessing: grayscale conversion + percentile contrast stretch.
//!
//! Feature detectors respond poorly to low-contrast imagery (hazy basemap
//! tiles, under-exposed frames), so both inputs are stretched so that the
//! 2nd..98th intensity percentiles span the full 8-bit range before any
//! features are extracted.

use image::{DynamicImage, GrayImage};

const LOW_PERCENTILE: f64 = 0.02;
const HIGH_PERCENTILE: f64 = 0.98;
const NUM_BINS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    /// The cumulative histogram crosses both percentiles in the same bin:
    /// the image is near-constant and the stretch gain is undefined.
    DegenerateImage { bin: usize },
    /// The image has no pixels.
    EmptyImage,
}

impl std::fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DegenerateImage { bin } => {
                write!(f, "near-constant image: both stretch percentiles fall in bin {}", bin)
            }
            Self::EmptyImage => write!(f, "image has no pixels"),
        }
    }
}

impl std::error::Error for PreprocessError {}

/// Convert to single-channel intensity and apply the percentile stretch.
///
/// The input is never mutated; already-grayscale images skip the channel
/// reduction and go straight to the stretch.
pub fn preprocess(image: &DynamicImage) -> Result<GrayImage, PreprocessError> {
    let gray = match image {
        DynamicImage::ImageLuma8(g) => g.clone(),
        other => other.to_luma8(),
    };
    stretch_contrast(&gray)
}

/// Linear contrast stretch anchored at the 2% / 98% cumulative-histogram
/// bins: `gain = 256 / (high - low)`, `offset = -low * gain`, output
/// clamped to `[0, 255]`.
pub fn stretch_contrast(gray: &GrayImage) -> Result<GrayImage, PreprocessError> {
    let num_pixels = gray.width() as u64 * gray.height() as u64;
    if num_pixels == 0 {
        return Err(PreprocessError::EmptyImage);
    }

    let mut hist = [0u64; NUM_BINS];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }

    // Lowest bins whose cumulative mass exceeds each percentile.
    let mut low_stretch: Option<usize> = None;
    let mut high_stretch: Option<usize> = None;
    let mut cumulative = 0.0f64;
    for (bin, &count) in hist.iter().enumerate() {
        cumulative += count as f64 / num_pixels as f64;
        if low_stretch.is_none() && cumulative > LOW_PERCENTILE {
            low_stretch = Some(bin);
        }
        if high_stretch.is_none() && cumulative > HIGH_PERCENTILE {
            high_stretch = Some(bin);
        }
    }

    // Cumulative mass reaches 1.0, so both bins are always found.
    let low = low_stretch.unwrap_or(0);
    let high = high_stretch.unwrap_or(NUM_BINS - 1);
    if high == low {
        return Err(PreprocessError::DegenerateImage { bin: low });
    }

    let gain = 256.0 / (high as f64 - low as f64);
    let offset = -(low as f64) * gain;

    let mut out = GrayImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(out.pixels_mut()) {
        let v = (src.0[0] as f64 * gain + offset).round().clamp(0.0, 255.0);
        dst.0[0] = v as u8;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray_of(w: u32, h: u32, f: impl Fn(u32, u32) -> u8) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([f(x, y)]))
    }

    #[test]
    fn constant_image_is_degenerate() {
        let img = gray_of(32, 32, |_, _| 128);
        assert_eq!(
            stretch_contrast(&img),
            Err(PreprocessError::DegenerateImage { bin: 128 })
        );
    }

    #[test]
    fn near_constant_image_is_degenerate() {
        // 99% of the mass in one bin: both percentile crossings land there.
        let img = gray_of(100, 100, |x, y| if x == 0 && y < 50 { 10 } else { 100 });
        assert!(matches!(
            stretch_contrast(&img),
            Err(PreprocessError::DegenerateImage { .. })
        ));
    }

    #[test]
    fn ramp_stretches_to_full_range() {
        // Horizontal ramp over a narrow band of intensities.
        let img = gray_of(256, 8, |x, _| (100 + x / 4) as u8);
        let out = stretch_contrast(&img).unwrap();
        let min = out.pixels().map(|p| p.0[0]).min().unwrap();
        let max = out.pixels().map(|p| p.0[0]).max().unwrap();
        assert!(min < 16, "low tail not stretched down: min={}", min);
        assert!(max > 240, "high tail not stretched up: max={}", max);
    }

    #[test]
    fn stretch_is_monotonic() {
        let img = gray_of(256, 4, |x, _| (x / 2 + 60) as u8);
        let out = stretch_contrast(&img).unwrap();
        for y in 0..4 {
            for x in 1..256 {
                assert!(out.get_pixel(x, y).0[0] >= out.get_pixel(x - 1, y).0[0]);
            }
        }
    }

    #[test]
    fn preprocess_accepts_color_input() {
        let rgb = image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 3) as u8, (y * 3) as u8, 40])
        });
        let out = preprocess(&DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn empty_image_is_rejected() {
        let img = GrayImage::new(0, 0);
        assert_eq!(stretch_contrast(&img), Err(PreprocessError::EmptyImage));
    }
}
